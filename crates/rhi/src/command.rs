//! Command pools, command buffers, queue submission and recording.
//!
//! Implements [`CommandOps`] for [`Device`]. Pools are created with
//! `RESET_COMMAND_BUFFER` on the graphics family; every command buffer the
//! core records is primary and one-time-submit.
//!
//! Layout transitions go through [`transition_masks`], which picks the
//! narrowest stage/access pair for the transitions the frame loop performs
//! and falls back to a full barrier for anything else.

use ash::vk;
use tracing::{debug, trace};

use crate::backend::{CommandOps, RenderingTargets, Submission};
use crate::device::Device;
use crate::error::RhiResult;

/// Depth clear value. The core renders with reversed depth.
pub const DEPTH_CLEAR_VALUE: f32 = 0.0;

/// Pipeline stage and access masks for one side of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierScope {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl BarrierScope {
    const fn new(stage: vk::PipelineStageFlags, access: vk::AccessFlags) -> Self {
        Self { stage, access }
    }

    const fn all() -> Self {
        Self::new(
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::from_raw(
                vk::AccessFlags::MEMORY_READ.as_raw() | vk::AccessFlags::MEMORY_WRITE.as_raw(),
            ),
        )
    }
}

/// Returns the (source, destination) barrier scopes for a layout transition.
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (BarrierScope, BarrierScope) {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let src = match old_layout {
        // Draw and depth images are shared by every slot, and the swapchain
        // image is only guarded by the acquire semaphore wait.
        L::UNDEFINED => BarrierScope::new(S::ALL_COMMANDS, A::MEMORY_WRITE),
        L::GENERAL => BarrierScope::new(S::COMPUTE_SHADER, A::SHADER_WRITE),
        L::COLOR_ATTACHMENT_OPTIMAL => {
            BarrierScope::new(S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE)
        }
        L::TRANSFER_DST_OPTIMAL => BarrierScope::new(S::TRANSFER, A::TRANSFER_WRITE),
        L::TRANSFER_SRC_OPTIMAL => BarrierScope::new(S::TRANSFER, A::TRANSFER_READ),
        _ => BarrierScope::all(),
    };

    let dst = match new_layout {
        L::GENERAL => BarrierScope::new(S::COMPUTE_SHADER, A::SHADER_READ | A::SHADER_WRITE),
        L::COLOR_ATTACHMENT_OPTIMAL => BarrierScope::new(
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
        ),
        L::DEPTH_ATTACHMENT_OPTIMAL => BarrierScope::new(
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        L::TRANSFER_SRC_OPTIMAL => BarrierScope::new(S::TRANSFER, A::TRANSFER_READ),
        L::TRANSFER_DST_OPTIMAL => BarrierScope::new(S::TRANSFER, A::TRANSFER_WRITE),
        L::SHADER_READ_ONLY_OPTIMAL => BarrierScope::new(S::FRAGMENT_SHADER, A::SHADER_READ),
        L::PRESENT_SRC_KHR => BarrierScope::new(S::BOTTOM_OF_PIPE, A::empty()),
        _ => BarrierScope::all(),
    };

    (src, dst)
}

/// Blit region covering two whole single-mip color images.
pub fn full_blit_region(src_extent: vk::Extent2D, dst_extent: vk::Extent2D) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1);

    vk::ImageBlit::default()
        .src_subresource(layers)
        .src_offsets([
            vk::Offset3D::default(),
            vk::Offset3D {
                x: src_extent.width as i32,
                y: src_extent.height as i32,
                z: 1,
            },
        ])
        .dst_subresource(layers)
        .dst_offsets([
            vk::Offset3D::default(),
            vk::Offset3D {
                x: dst_extent.width as i32,
                y: dst_extent.height as i32,
                z: 1,
            },
        ])
}

fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

impl CommandOps for Device {
    // =========================================================================
    // Pools and Buffers
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.graphics_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { self.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {}",
            self.graphics_family()
        );

        Ok(pool)
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.handle().allocate_command_buffers(&alloc_info)? };
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| crate::RhiError::InvalidHandle("no command buffer returned".into()))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe {
            self.handle().destroy_command_pool(pool, None);
        }
        debug!("Command pool destroyed");
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.handle()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.handle().begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.handle().end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> RhiResult<()> {
        let command_buffers = [submission.command_buffer];
        let (wait_semaphores, wait_stages) = match submission.wait {
            Some((semaphore, stage)) => (vec![semaphore], vec![stage]),
            None => (Vec::new(), Vec::new()),
        };
        let signal_semaphores: Vec<vk::Semaphore> = submission.signal.into_iter().collect();

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.handle()
                .queue_submit(self.graphics_queue(), &[submit_info], submission.fence)?;
        }
        trace!("Submitted command buffer to graphics queue");
        Ok(())
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src, dst) = transition_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(full_range(aspect))
            .src_access_mask(src.access)
            .dst_access_mask(dst.access);

        unsafe {
            self.handle().cmd_pipeline_barrier(
                cmd,
                src.stage,
                dst.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    // =========================================================================
    // Transfer Commands
    // =========================================================================

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe {
            self.handle().cmd_copy_buffer(cmd, src, dst, regions);
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent3D,
    ) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(extent);

        unsafe {
            self.handle().cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let region = full_blit_region(src_extent, dst_extent);

        unsafe {
            self.handle().cmd_blit_image(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }
    }

    fn cmd_clear_color_image(&self, cmd: vk::CommandBuffer, image: vk::Image, color: [f32; 4]) {
        let clear = vk::ClearColorValue { float32: color };
        unsafe {
            self.handle().cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                &[full_range(vk::ImageAspectFlags::COLOR)],
            );
        }
    }

    // =========================================================================
    // Pipeline Binding
    // =========================================================================

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe {
            self.handle().cmd_bind_pipeline(cmd, bind_point, pipeline);
        }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.handle()
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]);
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.handle()
                .cmd_push_constants(cmd, layout, stages, offset, bytes);
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe {
            self.handle().cmd_dispatch(cmd, x, y, z);
        }
    }

    // =========================================================================
    // Dynamic Rendering
    // =========================================================================

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, targets: &RenderingTargets) {
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(targets.color)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];

        let depth_attachment = targets.depth.map(|view| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: DEPTH_CLEAR_VALUE,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: targets.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.handle().cmd_begin_rendering(cmd, &rendering_info);
        }
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.handle().cmd_end_rendering(cmd);
        }
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };

        unsafe {
            self.handle().cmd_set_viewport(cmd, 0, &[viewport]);
            self.handle().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe {
            self.handle()
                .cmd_bind_index_buffer(cmd, buffer, offset, vk::IndexType::UINT32);
        }
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, first_index: u32) {
        unsafe {
            self.handle()
                .cmd_draw_indexed(cmd, index_count, 1, first_index, 0, 0);
        }
    }
}
