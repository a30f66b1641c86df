//! Synchronization primitives for the Vulkan device.
//!
//! Implements [`SyncOps`] for [`Device`]:
//!
//! - **Fences** synchronize the CPU with GPU work. Frame slots create theirs
//!   signaled so the first wait on a fresh slot returns immediately.
//! - **Semaphores** order GPU work: acquire to render, render to present.
//!
//! # Usage Pattern
//!
//! ```text
//! 1. wait_for_fence(render_fence)     CPU waits for the slot's previous submission
//! 2. acquire (signals acquire_semaphore)
//! 3. reset_fence(render_fence)        only once a submission is certain
//! 4. submit: wait acquire_semaphore, signal render_semaphore + render_fence
//! 5. present: wait render_semaphore
//! ```

use ash::vk;
use tracing::{debug, trace};

use crate::backend::SyncOps;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Creation flags for a fence that may start signaled.
#[inline]
pub fn fence_flags(signaled: bool) -> vk::FenceCreateFlags {
    if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    }
}

/// Maps the raw result of a fence wait onto the crate error type.
///
/// `TIMEOUT` is not an error code in Vulkan, but a frame core that waited a
/// bounded time and did not get its fence back cannot proceed.
pub fn check_fence_wait(result: Result<(), vk::Result>, timeout_ns: u64) -> RhiResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout { timeout_ns }),
        Err(e) => Err(e.into()),
    }
}

impl SyncOps for Device {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let create_info = vk::FenceCreateInfo::default().flags(fence_flags(signaled));

        let fence = unsafe { self.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        let fences = [fence];
        let result = unsafe { self.handle().wait_for_fences(&fences, true, timeout_ns) };
        check_fence_wait(result, timeout_ns)
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let fences = [fence];
        unsafe { self.handle().reset_fences(&fences)? };
        trace!("Reset fence");
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe {
            self.handle().destroy_fence(fence, None);
        }
        debug!("Destroyed fence");
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { self.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe {
            self.handle().destroy_semaphore(semaphore, None);
        }
        debug!("Destroyed semaphore");
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.handle().device_wait_idle()? };
        Ok(())
    }
}
