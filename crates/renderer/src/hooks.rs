//! Host callbacks invoked while a frame is recorded.
//!
//! The renderer owns the frame structure (background pass, layout
//! transitions, blit, present). Hosts fill in two points of it through
//! [`FrameHooks`]:
//!
//! - `record_geometry` runs inside the dynamic rendering scope on the draw
//!   and depth images, with viewport and scissor already set.
//! - `record_overlay` runs inside a scope on the swapchain image after the
//!   blit, without depth. UI goes here.
//!
//! Both receive a [`FrameContext`] which exposes the slot's command buffer,
//! its transient descriptor allocator and its deletion queue.

use ash::vk;

use renderer_rhi::backend::{BufferDesc, GpuBackend, GpuBuffer, MemoryResidency};

use crate::deletion_queue::DeletionQueue;
use crate::descriptor_allocator::DescriptorAllocator;
use crate::error::{RenderError, RenderResult};

/// One indexed draw recorded by [`FrameContext::draw`].
#[derive(Clone, Copy, Debug)]
pub struct DrawCommand<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// Bound from set 0. Empty skips the bind.
    pub descriptor_sets: &'a [vk::DescriptorSet],
    /// Pushed at offset 0. Empty skips the push.
    pub push_constants: &'a [u8],
    pub push_stages: vk::ShaderStageFlags,
    /// `u32` indices.
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub first_index: u32,
}

/// Recording state handed to [`FrameHooks`].
///
/// Descriptor sets allocated here and resources deferred here live until
/// the slot's fence is next observed, i.e. [`crate::MAX_FRAMES_IN_FLIGHT`]
/// frames later.
pub struct FrameContext<'a, B: GpuBackend> {
    backend: &'a B,
    command_buffer: vk::CommandBuffer,
    slot: usize,
    frame_number: u64,
    extent: vk::Extent2D,
    descriptors: &'a mut DescriptorAllocator,
    deletion_queue: &'a mut DeletionQueue<B>,
    draw_count: u32,
}

impl<'a, B: GpuBackend> FrameContext<'a, B> {
    pub(crate) fn new(
        backend: &'a B,
        command_buffer: vk::CommandBuffer,
        slot: usize,
        frame_number: u64,
        extent: vk::Extent2D,
        descriptors: &'a mut DescriptorAllocator,
        deletion_queue: &'a mut DeletionQueue<B>,
    ) -> Self {
        Self {
            backend,
            command_buffer,
            slot,
            frame_number,
            extent,
            descriptors,
            deletion_queue,
            draw_count: 0,
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        self.backend
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Render area of the current scope.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Draws recorded through [`Self::draw`] so far in this frame.
    #[inline]
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    pub(crate) fn set_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }

    /// Allocates a set from the slot's allocator. Valid for this frame only.
    ///
    /// # Errors
    ///
    /// See [`DescriptorAllocator::allocate`].
    pub fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        self.descriptors.allocate(self.backend, layout)
    }

    /// Destroys `buffer` once this slot's submission has completed.
    pub fn defer_buffer(&mut self, buffer: B::Buffer) {
        self.deletion_queue.push_buffer(buffer);
    }

    /// Destroys `image` once this slot's submission has completed.
    pub fn defer_image(&mut self, image: B::Image) {
        self.deletion_queue.push_image(image);
    }

    /// Creates a host-visible buffer holding `bytes` and defers its
    /// destruction to the slot's queue. Suited to per-frame uniforms.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EmptyUpload`] for empty input, or the
    /// creation/write error.
    pub fn upload_transient(
        &mut self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RenderResult<vk::Buffer> {
        if bytes.is_empty() {
            return Err(RenderError::EmptyUpload);
        }

        let mut buffer = self.backend.create_buffer(&BufferDesc {
            size: bytes.len() as vk::DeviceSize,
            usage,
            residency: MemoryResidency::CpuToGpu,
            name,
        })?;
        if let Err(e) = buffer.write(0, bytes) {
            self.backend.destroy_buffer(buffer);
            return Err(e.into());
        }

        let handle = buffer.handle();
        self.deletion_queue.push_buffer(buffer);
        Ok(handle)
    }

    /// Records `command` as a graphics draw.
    pub fn draw(&mut self, command: &DrawCommand<'_>) {
        let cmd = self.command_buffer;
        let backend = self.backend;

        backend.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, command.pipeline);
        if !command.descriptor_sets.is_empty() {
            backend.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                command.layout,
                0,
                command.descriptor_sets,
            );
        }
        if !command.push_constants.is_empty() {
            backend.cmd_push_constants(
                cmd,
                command.layout,
                command.push_stages,
                0,
                command.push_constants,
            );
        }
        backend.cmd_bind_index_buffer(cmd, command.index_buffer, 0);
        backend.cmd_draw_indexed(cmd, command.index_count, command.first_index);

        self.draw_count += 1;
    }
}

/// Host recording callbacks. Both default to recording nothing.
pub trait FrameHooks<B: GpuBackend> {
    /// Records geometry into the draw image with the depth image attached.
    ///
    /// Load ops and the depth clear value are chosen by the backend's
    /// [`renderer_rhi::backend::CommandOps::cmd_begin_rendering`].
    fn record_geometry(&mut self, ctx: &mut FrameContext<'_, B>) -> RenderResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Records into the swapchain image after the blit.
    fn record_overlay(&mut self, ctx: &mut FrameContext<'_, B>) -> RenderResult<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Records only the background pass.
impl<B: GpuBackend> FrameHooks<B> for () {}
