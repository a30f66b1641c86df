//! Renderer configuration.
//!
//! [`RendererConfig`] collects every tunable the frame core reads at
//! creation time. `Default` gives the values the core was designed around;
//! `with_*` methods override individual fields.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use renderer_renderer::config::RendererConfig;
//!
//! let config = RendererConfig::default()
//!     .with_frame_fence_timeout(Duration::from_millis(500))
//!     .with_clear_color([0.0, 0.0, 0.0, 1.0]);
//! assert_eq!(config.workgroup_size, 16);
//! ```

use std::time::Duration;

use ash::vk;

/// Upper bound on `sets_per_pool` for a growing descriptor allocator.
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Factor applied to `sets_per_pool` each time a new pool is created.
pub const POOL_GROWTH_FACTOR: f32 = 1.5;

/// Descriptors of one type reserved per set in a pool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor type.
    pub ty: vk::DescriptorType,
    /// Descriptors of `ty` per set.
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Creates a ratio entry.
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Sizing of one growable descriptor allocator.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolConfig {
    /// Capacity of the first pool, in sets.
    pub initial_sets: u32,
    /// Descriptors per set, by type.
    pub ratios: Vec<PoolSizeRatio>,
}

impl PoolConfig {
    /// Per-frame transient allocator: 1000 sets, mixed storage/uniform/sampler.
    pub fn frame_default() -> Self {
        Self {
            initial_sets: 1000,
            ratios: vec![
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
                PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
            ],
        }
    }

    /// Long-lived allocator for sets that survive the whole run.
    pub fn global_default() -> Self {
        Self {
            initial_sets: 10,
            ratios: vec![
                PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
                PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
            ],
        }
    }
}

/// Frame core configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Bound on the per-cycle wait for a slot's fence. Expiry is fatal.
    pub frame_fence_timeout: Duration,
    /// Bound on the swapchain acquire.
    pub acquire_timeout: Duration,
    /// Bound on the immediate-submit wait. Expiry is fatal.
    pub immediate_timeout: Duration,
    /// Format of the offscreen draw image.
    pub draw_format: vk::Format,
    /// Format of the depth image.
    pub depth_format: vk::Format,
    /// Local workgroup size (square) of the background compute shaders.
    pub workgroup_size: u32,
    /// Color the draw image is cleared to when no background effect is registered.
    pub clear_color: [f32; 4],
    /// Sizing of each frame slot's descriptor allocator.
    pub frame_pool: PoolConfig,
    /// Sizing of the renderer-wide descriptor allocator.
    pub global_pool: PoolConfig,
    /// Layout of the draw-image descriptor set (one storage image at binding 0).
    ///
    /// Created by the host alongside its compute pipelines; null disables
    /// the background pass.
    pub draw_image_layout: vk::DescriptorSetLayout,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frame_fence_timeout: Duration::from_secs(1),
            acquire_timeout: Duration::from_secs(1),
            immediate_timeout: Duration::from_nanos(9_999_999_999),
            draw_format: vk::Format::R16G16B16A16_SFLOAT,
            depth_format: vk::Format::D32_SFLOAT,
            workgroup_size: 16,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_pool: PoolConfig::frame_default(),
            global_pool: PoolConfig::global_default(),
            draw_image_layout: vk::DescriptorSetLayout::null(),
        }
    }
}

impl RendererConfig {
    /// Sets the per-cycle fence timeout.
    pub fn with_frame_fence_timeout(mut self, timeout: Duration) -> Self {
        self.frame_fence_timeout = timeout;
        self
    }

    /// Sets the swapchain acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the immediate-submit timeout.
    pub fn with_immediate_timeout(mut self, timeout: Duration) -> Self {
        self.immediate_timeout = timeout;
        self
    }

    /// Sets the draw image format.
    pub fn with_draw_format(mut self, format: vk::Format) -> Self {
        self.draw_format = format;
        self
    }

    /// Sets the depth image format.
    pub fn with_depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    /// Sets the compute workgroup size. Zero is treated as one.
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size.max(1);
        self
    }

    /// Sets the fallback clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Sets the per-frame descriptor allocator sizing.
    pub fn with_frame_pool(mut self, pool: PoolConfig) -> Self {
        self.frame_pool = pool;
        self
    }

    /// Sets the global descriptor allocator sizing.
    pub fn with_global_pool(mut self, pool: PoolConfig) -> Self {
        self.global_pool = pool;
        self
    }

    /// Sets the draw-image descriptor set layout.
    pub fn with_draw_image_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.draw_image_layout = layout;
        self
    }

    /// Fence timeout in nanoseconds, saturating at `u64::MAX`.
    #[inline]
    pub fn frame_fence_timeout_ns(&self) -> u64 {
        duration_ns(self.frame_fence_timeout)
    }

    /// Acquire timeout in nanoseconds.
    #[inline]
    pub fn acquire_timeout_ns(&self) -> u64 {
        duration_ns(self.acquire_timeout)
    }

    /// Immediate-submit timeout in nanoseconds.
    #[inline]
    pub fn immediate_timeout_ns(&self) -> u64 {
        duration_ns(self.immediate_timeout)
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
