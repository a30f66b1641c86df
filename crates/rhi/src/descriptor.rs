//! Descriptor layouts, pools and set writes.
//!
//! Implements [`DescriptorOps`] for [`Device`] and provides two helpers that
//! work against any [`DescriptorOps`] implementation:
//!
//! - [`DescriptorLayoutBuilder`] accumulates bindings and creates a layout
//! - [`DescriptorWriter`] accumulates image and buffer writes and applies
//!   them to a set in one `vkUpdateDescriptorSets` call
//!
//! Pools are created without `FREE_DESCRIPTOR_SET`. Sets are never freed
//! individually; the frame core reclaims them by resetting whole pools.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::backend::DescriptorOps;
//! use renderer_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorWriter};
//! use renderer_rhi::vk;
//!
//! # fn example<D: DescriptorOps>(device: &D, set: vk::DescriptorSet, view: vk::ImageView)
//! #     -> Result<(), renderer_rhi::RhiError> {
//! let layout = DescriptorLayoutBuilder::new()
//!     .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
//!     .build(device, vk::ShaderStageFlags::COMPUTE)?;
//!
//! let mut writer = DescriptorWriter::new();
//! writer.write_image(
//!     0,
//!     view,
//!     vk::Sampler::null(),
//!     vk::ImageLayout::GENERAL,
//!     vk::DescriptorType::STORAGE_IMAGE,
//! );
//! writer.update_set(device, set);
//! # let _ = layout;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::backend::DescriptorOps;
use crate::device::Device;
use crate::error::RhiResult;

impl DescriptorOps for Device {
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            self.handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe {
            self.handle().destroy_descriptor_set_layout(layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { self.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.handle().allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        unsafe {
            self.handle()
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.handle().destroy_descriptor_pool(pool, None);
        }
        debug!("Destroyed descriptor pool");
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        if writes.is_empty() {
            return;
        }

        unsafe {
            self.handle().update_descriptor_sets(writes, &[]);
        }
    }
}

/// Accumulates single-descriptor bindings for a set layout.
#[derive(Clone, Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding holding one descriptor of type `ty`.
    ///
    /// Stage flags are filled in by [`Self::build`].
    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1),
        );
        self
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Returns the accumulated bindings.
    #[inline]
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Creates the layout, making every binding visible to `stages`.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build<D: DescriptorOps + ?Sized>(
        mut self,
        device: &D,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        device.create_descriptor_set_layout(&self.bindings)
    }
}

#[derive(Clone, Copy, Debug)]
enum PendingWrite {
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
}

/// Accumulates descriptor writes and applies them to a set.
///
/// The writer can be reused: call [`Self::clear`] and record new writes.
#[derive(Clone, Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an image write.
    ///
    /// `sampler` may be null for storage and sampled images.
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        let info = vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(layout);
        self.writes.push(PendingWrite::Image { binding, ty, info });
        self
    }

    /// Queues a buffer write covering `size` bytes from `offset`.
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(size);
        self.writes.push(PendingWrite::Buffer { binding, ty, info });
        self
    }

    /// Drops every queued write.
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Number of queued writes.
    #[inline]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if no writes are queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies every queued write to `set`.
    pub fn update_set<D: DescriptorOps + ?Sized>(&self, device: &D, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|pending| match pending {
                PendingWrite::Image { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info)),
                PendingWrite::Buffer { binding, ty, info } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info)),
            })
            .collect();

        device.update_descriptor_sets(&writes);
        debug!("Updated descriptor set with {} write(s)", writes.len());
    }
}
