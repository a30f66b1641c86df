//! Frame scheduler.
//!
//! [`Renderer`] owns every component of the frame core and drives one draw
//! cycle per [`Renderer::draw`] call:
//!
//! ```text
//! wait slot fence -> flush deletion queue, reset descriptors
//!   -> acquire swapchain image -> reset fence
//!   -> record: background compute, geometry, blit, overlay
//!   -> submit -> present
//! ```
//!
//! An out-of-date swapchain at acquire or present never becomes an error.
//! It raises a sticky resize request; the host calls
//! [`Renderer::resize_if_necessary`] at the top of its loop, which idles
//! the device and rebuilds the swapchain and the render targets.
//!
//! # Resource Destruction Order
//!
//! There is no `Drop` impl. [`Renderer::shutdown`] must be called; it waits
//! for the device, then destroys frames, the immediate context, the render
//! targets, the global descriptor allocator and the presenter, and finally
//! runs the host's teardown guards in reverse registration order.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, error, info, trace};

use renderer_core::Timer;
use renderer_rhi::backend::{GpuBackend, GpuImage, Presenter, RenderingTargets, Submission};
use renderer_rhi::descriptor::DescriptorWriter;
use renderer_rhi::vk_check;

use crate::MAX_FRAMES_IN_FLIGHT;
use crate::config::RendererConfig;
use crate::descriptor_allocator::DescriptorAllocator;
use crate::effects::{ComputeEffect, EffectSet, workgroup_count};
use crate::error::RenderResult;
use crate::frame::{FrameSlot, SlotState, slot_index};
use crate::hooks::{FrameContext, FrameHooks};
use crate::immediate::ImmediateContext;
use crate::targets::RenderTargets;
use crate::teardown::TeardownStack;

/// What a call to [`Renderer::draw`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// No image reached the presentation engine: a resize is pending, the
    /// window is minimized, or the swapchain went out of date.
    Skipped,
}

/// Timings of the last submitted frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_number: u64,
    /// Time since the previous submitted frame.
    pub frame_time: Duration,
    /// CPU time spent recording the command buffer.
    pub record_time: Duration,
    pub draw_count: u32,
}

/// Owner of the frame core.
pub struct Renderer<B: GpuBackend, P: Presenter> {
    backend: Arc<B>,
    presenter: P,
    config: RendererConfig,

    frames: Vec<FrameSlot<B>>,
    immediate: ImmediateContext,
    global_descriptors: DescriptorAllocator,

    targets: RenderTargets<B>,
    /// Storage-image binding of the draw image, read by the background effects.
    draw_image_set: Option<vk::DescriptorSet>,
    effects: EffectSet,

    frame_number: u64,
    resize_requested: bool,
    window_extent: vk::Extent2D,

    stats: FrameStats,
    frame_timer: Timer,
    teardown: TeardownStack<B>,
}

impl<B: GpuBackend, P: Presenter> Renderer<B, P> {
    /// Creates the frame slots, the immediate context, the global descriptor
    /// allocator and the render targets at the presenter's extent.
    ///
    /// If `config.draw_image_layout` is non-null, a draw-image descriptor set
    /// is allocated from the global allocator and bound to the draw image.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure. Everything created before it is
    /// destroyed.
    pub fn new(backend: Arc<B>, presenter: P, config: RendererConfig) -> RenderResult<Self> {
        let extent = presenter.extent();
        info!(
            "Initializing frame core ({}x{}, {} frames in flight, {} swapchain images)",
            extent.width,
            extent.height,
            MAX_FRAMES_IN_FLIGHT,
            presenter.image_count()
        );

        let device = &*backend;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for index in 0..MAX_FRAMES_IN_FLIGHT {
            match FrameSlot::new(device, index, &config.frame_pool) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    destroy_frames(device, frames);
                    return Err(e);
                }
            }
        }

        let immediate = match ImmediateContext::new(device, config.immediate_timeout_ns()) {
            Ok(immediate) => immediate,
            Err(e) => {
                destroy_frames(device, frames);
                return Err(e);
            }
        };

        let mut global_descriptors = match DescriptorAllocator::new(device, &config.global_pool) {
            Ok(allocator) => allocator,
            Err(e) => {
                immediate.destroy(device);
                destroy_frames(device, frames);
                return Err(e);
            }
        };

        let targets = match RenderTargets::new(
            device,
            extent,
            config.draw_format,
            config.depth_format,
        ) {
            Ok(targets) => targets,
            Err(e) => {
                global_descriptors.destroy(device);
                immediate.destroy(device);
                destroy_frames(device, frames);
                return Err(e);
            }
        };

        let draw_image_set = if config.draw_image_layout == vk::DescriptorSetLayout::null() {
            debug!("No draw image layout, background pass clears instead of dispatching");
            None
        } else {
            match global_descriptors.allocate(device, config.draw_image_layout) {
                Ok(set) => {
                    write_draw_image_set(device, set, &targets);
                    Some(set)
                }
                Err(e) => {
                    targets.destroy(device);
                    global_descriptors.destroy(device);
                    immediate.destroy(device);
                    destroy_frames(device, frames);
                    return Err(e);
                }
            }
        };

        info!("Frame core initialized");

        Ok(Self {
            backend,
            presenter,
            config,
            frames,
            immediate,
            global_descriptors,
            targets,
            draw_image_set,
            effects: EffectSet::new(),
            frame_number: 0,
            resize_requested: false,
            window_extent: extent,
            stats: FrameStats::default(),
            frame_timer: Timer::new(),
            teardown: TeardownStack::new(),
        })
    }

    // =========================================================================
    // Draw Loop
    // =========================================================================

    /// Runs one draw cycle on slot `frame_number % MAX_FRAMES_IN_FLIGHT`.
    ///
    /// Returns [`FrameOutcome::Skipped`] without touching any slot while a
    /// resize is pending or the window is minimized. An out-of-date
    /// swapchain at acquire skips the cycle before anything is submitted;
    /// at present it skips after submission. Both raise a resize request.
    ///
    /// # Errors
    ///
    /// Fence timeouts, device errors and hook errors are fatal. After a
    /// hook error the slot is left unsubmitted and the renderer must be
    /// shut down.
    pub fn draw<H>(&mut self, hooks: &mut H) -> RenderResult<FrameOutcome>
    where
        H: FrameHooks<B> + ?Sized,
    {
        if self.resize_requested {
            trace!("Resize pending, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }
        if is_zero_extent(self.window_extent) {
            trace!("Window minimized, skipping frame");
            return Ok(FrameOutcome::Skipped);
        }

        let slot = slot_index(self.frame_number);
        let backend = &*self.backend;
        let frame = &mut self.frames[slot];

        frame.wait_and_reclaim(backend, self.config.frame_fence_timeout_ns())?;

        let acquired = match self
            .presenter
            .acquire_next_image(frame.acquire_semaphore(), self.config.acquire_timeout_ns())
        {
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date on acquire, requesting resize");
                self.resize_requested = true;
                return Ok(FrameOutcome::Skipped);
            }
            other => vk_check(other)?,
        };
        if acquired.suboptimal {
            debug!("Swapchain suboptimal on acquire, presenting anyway");
        }

        backend.reset_fence(frame.render_fence())?;
        frame.set_state(SlotState::Recording);

        let record_timer = Timer::new();
        let recorder = FrameRecorder {
            backend,
            presenter: &self.presenter,
            targets: &self.targets,
            effects: &self.effects,
            draw_image_set: self.draw_image_set,
            config: &self.config,
        };
        let draw_count = recorder.record(frame, acquired.index, self.frame_number, hooks)?;
        let record_time = record_timer.elapsed();

        backend.submit(&Submission {
            command_buffer: frame.command_buffer(),
            wait: Some((
                frame.acquire_semaphore(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(frame.render_semaphore()),
            fence: frame.render_fence(),
        })?;
        frame.set_state(SlotState::Submitted);
        let render_semaphore = frame.render_semaphore();

        self.stats = FrameStats {
            frame_number: self.frame_number,
            frame_time: self.frame_timer.lap(),
            record_time,
            draw_count,
        };
        trace!(
            "Frame {} submitted on slot {} ({} draws, recorded in {:?})",
            self.frame_number, slot, draw_count, record_time
        );
        self.frame_number += 1;

        let presented = self.presenter.present(acquired.index, render_semaphore);
        if presented == Err(vk::Result::ERROR_OUT_OF_DATE_KHR) {
            debug!("Swapchain out of date on present, requesting resize");
            self.resize_requested = true;
            return Ok(FrameOutcome::Skipped);
        }
        if vk_check(presented)? {
            debug!("Present returned suboptimal");
        }

        Ok(FrameOutcome::Presented)
    }

    /// Rebuilds the swapchain and render targets if a resize is pending.
    ///
    /// Returns `Ok(true)` if a rebuild happened. While the window is
    /// minimized nothing is done and the request stays pending.
    ///
    /// # Errors
    ///
    /// Device-idle, swapchain and image creation failures are fatal.
    pub fn resize_if_necessary(&mut self) -> RenderResult<bool> {
        if !self.resize_requested {
            return Ok(false);
        }
        if is_zero_extent(self.window_extent) {
            debug!("Window minimized, deferring resize");
            return Ok(false);
        }

        let backend = &*self.backend;
        backend.wait_idle()?;

        let extent = self.presenter.recreate(self.window_extent)?;
        if is_zero_extent(extent) {
            debug!("Surface reports a zero extent, deferring resize");
            return Ok(false);
        }

        let targets = RenderTargets::new(
            backend,
            extent,
            self.config.draw_format,
            self.config.depth_format,
        )?;
        let old_targets = std::mem::replace(&mut self.targets, targets);
        old_targets.destroy(backend);

        if let Some(set) = self.draw_image_set {
            write_draw_image_set(backend, set, &self.targets);
        }

        self.resize_requested = false;
        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(true)
    }

    /// Records the host window size.
    ///
    /// A size different from the presenter's raises a resize request. A
    /// zero dimension marks the window minimized until a non-zero size
    /// arrives.
    pub fn set_window_extent(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if extent == self.window_extent {
            return;
        }
        self.window_extent = extent;

        if is_zero_extent(extent) {
            debug!("Window minimized");
            return;
        }
        if extent != self.presenter.extent() {
            debug!("Window resized to {}x{}, requesting resize", width, height);
            self.resize_requested = true;
        }
    }

    /// Forces a rebuild on the next [`Self::resize_if_necessary`].
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    // =========================================================================
    // Uploads and Descriptors
    // =========================================================================

    /// Records `record` and blocks until the GPU has executed it.
    ///
    /// # Errors
    ///
    /// See [`ImmediateContext::submit_and_wait`].
    pub fn immediate_submit<T, F>(&mut self, payload: &T, record: F) -> RenderResult<()>
    where
        T: ?Sized,
        F: FnOnce(&B, vk::CommandBuffer, &T) -> RenderResult<()>,
    {
        self.immediate.submit_and_wait(&*self.backend, payload, record)
    }

    /// Uploads `bytes` into a new device-local buffer.
    ///
    /// # Errors
    ///
    /// See [`ImmediateContext::upload_buffer`].
    pub fn upload_buffer(
        &mut self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RenderResult<B::Buffer> {
        self.immediate
            .upload_buffer(&*self.backend, bytes, usage, name)
    }

    /// Allocates a set that lives until shutdown.
    ///
    /// # Errors
    ///
    /// See [`DescriptorAllocator::allocate`].
    pub fn allocate_global_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        self.global_descriptors.allocate(&*self.backend, layout)
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Registers a background effect and returns its index.
    pub fn add_effect(&mut self, effect: ComputeEffect) -> usize {
        info!("Registered background effect '{}'", effect.name);
        self.effects.push(effect)
    }

    /// Selects the background effect dispatched from the next frame on.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RenderError::EffectOutOfRange`]; the selection is unchanged.
    pub fn select_effect(&mut self, index: usize) -> RenderResult<()> {
        let effect = self.effects.select(index)?;
        debug!("Selected background effect '{}'", effect.name);
        Ok(())
    }

    #[inline]
    pub fn effects(&self) -> &EffectSet {
        &self.effects
    }

    /// Mutable access, e.g. to edit the current effect's push constants.
    #[inline]
    pub fn effects_mut(&mut self) -> &mut EffectSet {
        &mut self.effects
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    #[inline]
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Slot the next [`Self::draw`] will use.
    #[inline]
    pub fn current_slot_index(&self) -> usize {
        slot_index(self.frame_number)
    }

    #[inline]
    pub fn frames(&self) -> &[FrameSlot<B>] {
        &self.frames
    }

    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn is_resize_requested(&self) -> bool {
        self.resize_requested
    }

    #[inline]
    pub fn window_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    #[inline]
    pub fn render_targets(&self) -> &RenderTargets<B> {
        &self.targets
    }

    #[inline]
    pub fn draw_image_set(&self) -> Option<vk::DescriptorSet> {
        self.draw_image_set
    }

    #[inline]
    pub fn global_descriptors(&self) -> &DescriptorAllocator {
        &self.global_descriptors
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Registers a guard run by [`Self::shutdown`] after every core resource
    /// is gone. Guards run most recent first.
    pub fn defer_teardown(
        &mut self,
        label: &'static str,
        guard: impl FnOnce(&B) -> RenderResult<()> + 'static,
    ) {
        self.teardown.push(label, guard);
    }

    /// Waits for the device and destroys everything the renderer owns.
    ///
    /// Destruction continues past a failed idle wait or a failing guard.
    ///
    /// # Errors
    ///
    /// Returns the idle-wait error if there was one, otherwise the teardown
    /// error.
    pub fn shutdown(self) -> RenderResult<()> {
        let Self {
            backend,
            presenter,
            frames,
            immediate,
            global_descriptors,
            targets,
            mut teardown,
            frame_number,
            ..
        } = self;
        let device = &*backend;

        info!("Shutting down frame core after {} frames", frame_number);

        let idle = device.wait_idle();
        if let Err(e) = &idle {
            error!("Device idle wait failed during shutdown: {}", e);
        }

        destroy_frames(device, frames);
        immediate.destroy(device);
        targets.destroy(device);
        global_descriptors.destroy(device);
        drop(presenter);

        let guards = teardown.run(device);

        info!("Frame core destroyed");
        idle?;
        guards
    }
}

/// Borrowed view of the renderer used while one command buffer is recorded.
struct FrameRecorder<'a, B: GpuBackend, P: Presenter> {
    backend: &'a B,
    presenter: &'a P,
    targets: &'a RenderTargets<B>,
    effects: &'a EffectSet,
    draw_image_set: Option<vk::DescriptorSet>,
    config: &'a RendererConfig,
}

impl<B: GpuBackend, P: Presenter> FrameRecorder<'_, B, P> {
    /// Records the whole frame into the slot's command buffer and returns
    /// the number of host draws.
    fn record<H>(
        &self,
        frame: &mut FrameSlot<B>,
        image_index: u32,
        frame_number: u64,
        hooks: &mut H,
    ) -> RenderResult<u32>
    where
        H: FrameHooks<B> + ?Sized,
    {
        use vk::ImageAspectFlags as Aspect;
        use vk::ImageLayout as Layout;

        let backend = self.backend;
        let cmd = frame.command_buffer();
        let slot = frame.index();

        backend.reset_command_buffer(cmd)?;
        backend.begin_command_buffer(cmd)?;

        let draw_image = self.targets.draw();
        let depth_image = self.targets.depth();
        let draw_extent = self.targets.extent();
        let swapchain_image = self.presenter.image(image_index);
        let swapchain_view = self.presenter.image_view(image_index);
        let swapchain_extent = self.presenter.extent();

        // Background
        let background_layout = self.record_background(cmd, draw_image.handle(), draw_extent);

        // Geometry
        backend.cmd_transition_image(
            cmd,
            draw_image.handle(),
            Aspect::COLOR,
            background_layout,
            Layout::COLOR_ATTACHMENT_OPTIMAL,
        );
        backend.cmd_transition_image(
            cmd,
            depth_image.handle(),
            Aspect::DEPTH,
            Layout::UNDEFINED,
            Layout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let (descriptors, deletion_queue) = frame.parts_mut();
        let mut ctx = FrameContext::new(
            backend,
            cmd,
            slot,
            frame_number,
            draw_extent,
            descriptors,
            deletion_queue,
        );

        backend.cmd_begin_rendering(
            cmd,
            &RenderingTargets {
                color: draw_image.view(),
                depth: Some(depth_image.view()),
                extent: draw_extent,
            },
        );
        backend.cmd_set_viewport_scissor(cmd, draw_extent);
        hooks.record_geometry(&mut ctx)?;
        backend.cmd_end_rendering(cmd);

        // Copy to swapchain
        backend.cmd_transition_image(
            cmd,
            draw_image.handle(),
            Aspect::COLOR,
            Layout::COLOR_ATTACHMENT_OPTIMAL,
            Layout::TRANSFER_SRC_OPTIMAL,
        );
        backend.cmd_transition_image(
            cmd,
            swapchain_image,
            Aspect::COLOR,
            Layout::UNDEFINED,
            Layout::TRANSFER_DST_OPTIMAL,
        );
        backend.cmd_blit_image(
            cmd,
            draw_image.handle(),
            swapchain_image,
            draw_extent,
            swapchain_extent,
        );

        // Overlay
        backend.cmd_transition_image(
            cmd,
            swapchain_image,
            Aspect::COLOR,
            Layout::TRANSFER_DST_OPTIMAL,
            Layout::COLOR_ATTACHMENT_OPTIMAL,
        );
        ctx.set_extent(swapchain_extent);
        backend.cmd_begin_rendering(
            cmd,
            &RenderingTargets {
                color: swapchain_view,
                depth: None,
                extent: swapchain_extent,
            },
        );
        backend.cmd_set_viewport_scissor(cmd, swapchain_extent);
        hooks.record_overlay(&mut ctx)?;
        backend.cmd_end_rendering(cmd);

        backend.cmd_transition_image(
            cmd,
            swapchain_image,
            Aspect::COLOR,
            Layout::COLOR_ATTACHMENT_OPTIMAL,
            Layout::PRESENT_SRC_KHR,
        );

        let draw_count = ctx.draw_count();
        backend.end_command_buffer(cmd)?;
        Ok(draw_count)
    }

    /// Dispatches the selected effect over the draw image, or clears it when
    /// there is no effect or no draw-image binding.
    ///
    /// Returns the layout the draw image is left in: `GENERAL` after a
    /// dispatch, `TRANSFER_DST_OPTIMAL` after a clear.
    fn record_background(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> vk::ImageLayout {
        let backend = self.backend;

        match (self.effects.current(), self.draw_image_set) {
            (Some(effect), Some(set)) => {
                backend.cmd_transition_image(
                    cmd,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::GENERAL,
                );
                let (x, y) = workgroup_count(extent, self.config.workgroup_size);
                backend.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, effect.pipeline);
                backend.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    effect.layout,
                    0,
                    &[set],
                );
                backend.cmd_push_constants(
                    cmd,
                    effect.layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    effect.push.as_bytes(),
                );
                backend.cmd_dispatch(cmd, x, y, 1);
                vk::ImageLayout::GENERAL
            }
            _ => {
                backend.cmd_transition_image(
                    cmd,
                    image,
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                backend.cmd_clear_color_image(cmd, image, self.config.clear_color);
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            }
        }
    }
}

/// Points binding 0 of `set` at the current draw image as a storage image.
fn write_draw_image_set<B: GpuBackend>(
    backend: &B,
    set: vk::DescriptorSet,
    targets: &RenderTargets<B>,
) {
    let mut writer = DescriptorWriter::new();
    writer.write_image(
        0,
        targets.draw().view(),
        vk::Sampler::null(),
        vk::ImageLayout::GENERAL,
        vk::DescriptorType::STORAGE_IMAGE,
    );
    writer.update_set(backend, set);
}

fn destroy_frames<B: GpuBackend>(backend: &B, frames: Vec<FrameSlot<B>>) {
    for frame in frames {
        frame.destroy(backend);
    }
}

#[inline]
fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_extent_detection() {
        assert!(is_zero_extent(vk::Extent2D {
            width: 0,
            height: 600
        }));
        assert!(is_zero_extent(vk::Extent2D {
            width: 800,
            height: 0
        }));
        assert!(!is_zero_extent(vk::Extent2D {
            width: 1,
            height: 1
        }));
    }

    #[test]
    fn test_default_stats_are_empty() {
        let stats = FrameStats::default();
        assert_eq!(stats.frame_number, 0);
        assert_eq!(stats.draw_count, 0);
        assert_eq!(stats.frame_time, Duration::ZERO);
    }
}
