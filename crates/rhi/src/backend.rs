//! Backend traits consumed by the frame core.
//!
//! The renderer never calls `ash` directly. Everything it needs from the
//! device, the memory allocator and the presentation engine goes through
//! the traits in this module:
//!
//! - [`SyncOps`] - fences, semaphores and device-idle waits
//! - [`CommandOps`] - command pools/buffers, queue submission and recording
//! - [`DescriptorOps`] - descriptor pools, set allocation and writes
//! - [`BufferOps`] / [`ImageOps`] - allocator-backed resources
//! - [`Presenter`] - swapchain image acquisition, presentation and recreation
//!
//! [`GpuBackend`] bundles the device-side traits and is implemented for every
//! type that implements all of them. [`crate::device::Device`] is the Vulkan
//! implementation; tests provide a recording mock.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;

/// Residency class requested for a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryResidency {
    /// Device-local memory, not host-visible.
    GpuOnly,
    /// Host-visible, host-coherent memory written by the CPU (staging, uniforms).
    CpuToGpu,
    /// Host-visible memory read back by the CPU.
    GpuToCpu,
}

impl MemoryResidency {
    /// Maps the residency class onto a gpu-allocator memory location.
    pub fn location(self) -> MemoryLocation {
        match self {
            MemoryResidency::GpuOnly => MemoryLocation::GpuOnly,
            MemoryResidency::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryResidency::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }

    /// Returns true if the CPU can map memory of this class.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryResidency::GpuOnly)
    }
}

/// Parameters for buffer creation.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc {
    /// Size in bytes. Must be non-zero.
    pub size: vk::DeviceSize,
    /// Vulkan usage flags.
    pub usage: vk::BufferUsageFlags,
    /// Requested residency.
    pub residency: MemoryResidency,
    /// Debug name passed to the allocator.
    pub name: &'static str,
}

impl BufferDesc {
    /// Host-visible transfer source for uploads.
    pub fn staging(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            residency: MemoryResidency::CpuToGpu,
            name: "staging",
        }
    }

    /// Host-visible uniform buffer, typically one per frame.
    pub fn uniform(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            residency: MemoryResidency::CpuToGpu,
            name: "uniform",
        }
    }
}

/// Parameters for 2D image creation.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    /// Image extent; depth is 1 for 2D images.
    pub extent: vk::Extent3D,
    /// Texel format.
    pub format: vk::Format,
    /// Vulkan usage flags.
    pub usage: vk::ImageUsageFlags,
    /// Aspect used for the default view and for transitions.
    pub aspect: vk::ImageAspectFlags,
    /// Debug name passed to the allocator.
    pub name: &'static str,
}

/// Host-side view of an allocated buffer.
pub trait GpuBuffer {
    /// Raw buffer handle for binding and copies.
    fn handle(&self) -> vk::Buffer;

    /// Size in bytes.
    fn size(&self) -> vk::DeviceSize;

    /// Residency the buffer was created with.
    fn residency(&self) -> MemoryResidency;

    /// Copies `data` into the mapped memory at `offset`.
    ///
    /// Fails for device-local buffers and for writes past the end.
    fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()>;

    /// Copies `len` bytes out of the mapped memory at `offset`.
    fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>>;
}

/// Host-side view of an allocated image and its default view.
pub trait GpuImage {
    /// Raw image handle.
    fn handle(&self) -> vk::Image;

    /// Default 2D view covering the whole image.
    fn view(&self) -> vk::ImageView;

    /// Image extent.
    fn extent(&self) -> vk::Extent3D;

    /// Texel format.
    fn format(&self) -> vk::Format;

    /// Extent as a 2D rectangle size.
    fn extent_2d(&self) -> vk::Extent2D {
        let extent = self.extent();
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        }
    }
}

/// A single queue submission of one primary command buffer.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    /// Command buffer to execute.
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage at which the wait applies.
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Semaphore signaled when the work completes.
    pub signal: Option<vk::Semaphore>,
    /// Fence signaled when the work completes.
    pub fence: vk::Fence,
}

/// Targets of a dynamic rendering scope.
#[derive(Clone, Copy, Debug)]
pub struct RenderingTargets {
    /// Color attachment view, loaded and stored.
    pub color: vk::ImageView,
    /// Optional depth attachment view, cleared and stored.
    pub depth: Option<vk::ImageView>,
    /// Render area.
    pub extent: vk::Extent2D,
}

/// Fence, semaphore and idle-wait operations.
pub trait SyncOps {
    /// Creates a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Blocks until `fence` is signaled or `timeout_ns` elapses.
    ///
    /// A timeout is reported as [`crate::RhiError::FenceTimeout`].
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()>;

    /// Returns `fence` to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    /// Destroys `fence`. It must not be pending on any queue.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Creates a binary semaphore.
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Destroys `semaphore`.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Blocks until every queue of the device is idle.
    fn wait_idle(&self) -> RhiResult<()>;
}

/// Command pool lifecycle, submission and the recording commands used by the core.
pub trait CommandOps {
    /// Creates a resettable command pool on the graphics family.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;

    /// Allocates one primary command buffer from `pool`.
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer>;

    /// Destroys `pool` and every command buffer allocated from it.
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Returns `cmd` to the initial state.
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Begins one-time-submit recording.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Ends recording.
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Submits to the graphics queue.
    fn submit(&self, submission: &Submission) -> RhiResult<()>;

    /// Records a layout transition of every mip level and layer of `image`.
    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    );

    /// Records a buffer-to-buffer copy.
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    /// Records a tightly packed buffer-to-image copy into a `TRANSFER_DST_OPTIMAL` image.
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    );

    /// Records a linear blit from a `TRANSFER_SRC_OPTIMAL` image to a
    /// `TRANSFER_DST_OPTIMAL` image, scaling between the two extents.
    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    );

    /// Clears a color image in `TRANSFER_DST_OPTIMAL` layout.
    fn cmd_clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]);

    /// Binds a pipeline.
    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    /// Binds descriptor sets starting at `first_set`.
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    /// Updates push constants from raw bytes.
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    );

    /// Dispatches compute workgroups.
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);

    /// Begins a dynamic rendering scope.
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, targets: &RenderingTargets);

    /// Ends the current dynamic rendering scope.
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);

    /// Sets a full-extent viewport and scissor.
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    /// Binds a `u32` index buffer.
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    );

    /// Records a single-instance indexed draw.
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32);
}

/// Descriptor layout, pool and set operations.
pub trait DescriptorOps {
    /// Creates a descriptor set layout from `bindings`.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout>;

    /// Destroys `layout`.
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Creates a pool without `FREE_DESCRIPTOR_SET`; sets are only reclaimed by reset.
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;

    /// Allocates one set.
    ///
    /// Returns the raw result so callers can tell `ERROR_OUT_OF_POOL_MEMORY`
    /// and `ERROR_FRAGMENTED_POOL` apart from fatal failures.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    /// Invalidates every set allocated from `pool`.
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()>;

    /// Destroys `pool`.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Applies descriptor writes.
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);
}

/// Allocator-backed buffer creation and destruction.
pub trait BufferOps {
    /// Buffer type produced by this backend.
    type Buffer: GpuBuffer;

    /// Creates a buffer and binds memory of the requested residency.
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<Self::Buffer>;

    /// Frees the memory and destroys the buffer.
    fn destroy_buffer(&self, buffer: Self::Buffer);
}

/// Allocator-backed image creation and destruction.
pub trait ImageOps {
    /// Image type produced by this backend.
    type Image: GpuImage;

    /// Creates a device-local 2D image with a default view.
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<Self::Image>;

    /// Destroys the view and the image and frees its memory.
    fn destroy_image(&self, image: Self::Image);
}

/// Everything the frame core needs from a device.
pub trait GpuBackend: SyncOps + CommandOps + DescriptorOps + BufferOps + ImageOps {}

impl<T> GpuBackend for T where T: SyncOps + CommandOps + DescriptorOps + BufferOps + ImageOps {}

/// Result of a successful image acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the presenter's image set.
    pub index: u32,
    /// The surface no longer matches exactly but the image is still usable.
    pub suboptimal: bool,
}

/// Presentation engine: the swapchain and its image set.
pub trait Presenter {
    /// Acquires the next presentable image, signaling `signal` when it is ready.
    ///
    /// Raw results are returned so the scheduler can recognize
    /// `ERROR_OUT_OF_DATE_KHR`.
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquiredImage, vk::Result>;

    /// Queues `image_index` for presentation after `wait` is signaled.
    ///
    /// Returns `Ok(true)` when the presentation was suboptimal.
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result>;

    /// Image handle for `index`.
    fn image(&self, index: u32) -> vk::Image;

    /// Image view for `index`.
    fn image_view(&self, index: u32) -> vk::ImageView;

    /// Current extent of the image set.
    fn extent(&self) -> vk::Extent2D;

    /// Number of images in the set.
    fn image_count(&self) -> u32;

    /// Destroys and recreates the image set for `requested`, returning the
    /// extent the surface actually accepted.
    ///
    /// If the surface currently resolves to a zero extent (minimized), the
    /// image set is left untouched and the zero extent is returned.
    ///
    /// The device must be idle.
    fn recreate(&mut self, requested: vk::Extent2D) -> RhiResult<vk::Extent2D>;
}
