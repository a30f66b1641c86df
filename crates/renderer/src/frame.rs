//! Per-frame slot resources.
//!
//! The renderer keeps [`crate::MAX_FRAMES_IN_FLIGHT`] slots and selects one
//! per draw by `frame_number % MAX_FRAMES_IN_FLIGHT`. Each slot has its own
//! command pool and buffer, synchronization primitives, descriptor allocator
//! and deletion queue, so the CPU can record slot N+1 while the GPU still
//! executes slot N.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on render_fence (previous occupancy of this slot is done)
//! 2. Flush deletion_queue, reset descriptors
//! 3. Acquire swapchain image (signals acquire_semaphore)
//! 4. Reset render_fence, record command_buffer
//! 5. Submit: wait acquire_semaphore, signal render_semaphore + render_fence
//! 6. Present (waits on render_semaphore)
//! ```
//!
//! Nothing in a slot is touched by the CPU between steps 5 and the next
//! step 1 on the same slot.

use ash::vk;
use tracing::debug;

use renderer_rhi::backend::GpuBackend;

use crate::config::PoolConfig;
use crate::deletion_queue::DeletionQueue;
use crate::descriptor_allocator::DescriptorAllocator;
use crate::error::RenderResult;

/// Lifecycle of a frame slot within the draw loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Not recording; any previous submission is complete or about to be waited on.
    Idle,
    /// Fence observed, resources reclaimed, commands being recorded.
    Recording,
    /// Submitted to the queue; its fence has not been waited on yet.
    Submitted,
}

/// One frame-in-flight worth of resources.
pub struct FrameSlot<B: GpuBackend> {
    index: usize,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    acquire_semaphore: vk::Semaphore,
    render_semaphore: vk::Semaphore,
    render_fence: vk::Fence,
    descriptors: DescriptorAllocator,
    deletion_queue: DeletionQueue<B>,
    state: SlotState,
}

impl<B: GpuBackend> FrameSlot<B> {
    /// Creates the slot's resources.
    ///
    /// The fence starts signaled so the first wait on the slot returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails. Resources created
    /// before the failure are destroyed.
    pub fn new(backend: &B, index: usize, pool_config: &PoolConfig) -> RenderResult<Self> {
        let command_pool = backend.create_command_pool()?;

        let created = (|| -> RenderResult<_> {
            let command_buffer = backend.allocate_command_buffer(command_pool)?;
            let acquire_semaphore = backend.create_semaphore()?;
            let render_semaphore = backend.create_semaphore().inspect_err(|_| {
                backend.destroy_semaphore(acquire_semaphore);
            })?;
            let render_fence = backend.create_fence(true).inspect_err(|_| {
                backend.destroy_semaphore(acquire_semaphore);
                backend.destroy_semaphore(render_semaphore);
            })?;
            let descriptors = DescriptorAllocator::new(backend, pool_config).inspect_err(|_| {
                backend.destroy_semaphore(acquire_semaphore);
                backend.destroy_semaphore(render_semaphore);
                backend.destroy_fence(render_fence);
            })?;
            Ok((
                command_buffer,
                acquire_semaphore,
                render_semaphore,
                render_fence,
                descriptors,
            ))
        })();

        let (command_buffer, acquire_semaphore, render_semaphore, render_fence, descriptors) =
            match created {
                Ok(parts) => parts,
                Err(e) => {
                    backend.destroy_command_pool(command_pool);
                    return Err(e);
                }
            };

        debug!("Created frame slot {}", index);

        Ok(Self {
            index,
            command_pool,
            command_buffer,
            acquire_semaphore,
            render_semaphore,
            render_fence,
            descriptors,
            deletion_queue: DeletionQueue::new(),
            state: SlotState::Idle,
        })
    }

    /// Slot index in `0..MAX_FRAMES_IN_FLIGHT`.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Primary command buffer recorded each cycle.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Semaphore signaled by swapchain acquisition.
    #[inline]
    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore
    }

    /// Semaphore signaled when the slot's submission completes; waited by present.
    #[inline]
    pub fn render_semaphore(&self) -> vk::Semaphore {
        self.render_semaphore
    }

    /// Fence signaled when the slot's submission completes.
    #[inline]
    pub fn render_fence(&self) -> vk::Fence {
        self.render_fence
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: SlotState) {
        self.state = state;
    }

    /// The slot's descriptor allocator.
    #[inline]
    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    /// The slot's deletion queue.
    #[inline]
    pub fn deletion_queue(&self) -> &DeletionQueue<B> {
        &self.deletion_queue
    }

    /// Mutable access to the descriptor allocator and the deletion queue.
    ///
    /// Only valid while the slot is not `Submitted`.
    #[inline]
    pub fn parts_mut(&mut self) -> (&mut DescriptorAllocator, &mut DeletionQueue<B>) {
        (&mut self.descriptors, &mut self.deletion_queue)
    }

    /// Waits for the slot's previous submission, then reclaims its deferred
    /// resources and descriptor sets.
    ///
    /// # Errors
    ///
    /// A fence timeout or reset failure is fatal.
    pub fn wait_and_reclaim(&mut self, backend: &B, timeout_ns: u64) -> RenderResult<()> {
        backend.wait_for_fence(self.render_fence, timeout_ns)?;
        self.state = SlotState::Idle;

        self.deletion_queue.flush(backend);
        self.descriptors.reset_all(backend)?;
        Ok(())
    }

    /// Destroys every resource of the slot. The device must be idle.
    pub fn destroy(self, backend: &B) {
        let Self {
            index,
            command_pool,
            acquire_semaphore,
            render_semaphore,
            render_fence,
            descriptors,
            deletion_queue,
            ..
        } = self;

        deletion_queue.destroy(backend);
        descriptors.destroy(backend);
        backend.destroy_fence(render_fence);
        backend.destroy_semaphore(render_semaphore);
        backend.destroy_semaphore(acquire_semaphore);
        backend.destroy_command_pool(command_pool);

        debug!("Destroyed frame slot {}", index);
    }
}

/// Slot used by frame `frame_number`.
#[inline]
pub fn slot_index(frame_number: u64) -> usize {
    (frame_number % crate::MAX_FRAMES_IN_FLIGHT as u64) as usize
}
