//! Synchronous one-off GPU work.
//!
//! [`ImmediateContext`] owns a fence and a command pool/buffer for the
//! lifetime of the device. [`ImmediateContext::submit_and_wait`] records a
//! caller-supplied closure, submits it without semaphores and blocks until
//! the GPU is done. It is meant for uploads at load time, not for per-frame
//! work: every call stalls the CPU.
//!
//! Callers must not overlap calls; the context has no internal locking and
//! takes `&mut self` to enforce that.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::backend::GpuBackend;
//! use renderer_rhi::vk;
//! use renderer_renderer::immediate::ImmediateContext;
//!
//! # fn example<B: GpuBackend>(backend: &B, src: vk::Buffer, dst: vk::Buffer)
//! #     -> renderer_renderer::RenderResult<()> {
//! let mut immediate = ImmediateContext::new(backend, 9_999_999_999)?;
//! let region = vk::BufferCopy::default().size(64);
//! immediate.submit_and_wait(backend, &region, |backend, cmd, region| {
//!     backend.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(region));
//!     Ok(())
//! })?;
//! immediate.destroy(backend);
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use renderer_rhi::backend::{BufferDesc, GpuBackend, GpuBuffer, MemoryResidency, Submission};

use crate::error::{RenderError, RenderResult};

/// Fence plus command pool/buffer for synchronous submissions.
pub struct ImmediateContext {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    timeout_ns: u64,
}

impl ImmediateContext {
    /// Creates the context. The fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails.
    pub fn new<B: GpuBackend>(backend: &B, timeout_ns: u64) -> RenderResult<Self> {
        let command_pool = backend.create_command_pool()?;
        let command_buffer = match backend.allocate_command_buffer(command_pool) {
            Ok(cmd) => cmd,
            Err(e) => {
                backend.destroy_command_pool(command_pool);
                return Err(e.into());
            }
        };
        let fence = match backend.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                backend.destroy_command_pool(command_pool);
                return Err(e.into());
            }
        };

        info!("Immediate submit context created");

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            timeout_ns,
        })
    }

    /// Records `record` into the context's command buffer, submits it and
    /// blocks until it completes.
    ///
    /// `payload` is handed to `record` unchanged so the closure does not
    /// need to capture the state it records from.
    ///
    /// # Errors
    ///
    /// Propagates errors from `record`. Submission failures and a fence
    /// timeout are fatal.
    pub fn submit_and_wait<B, T, F>(&mut self, backend: &B, payload: &T, record: F) -> RenderResult<()>
    where
        B: GpuBackend,
        T: ?Sized,
        F: FnOnce(&B, vk::CommandBuffer, &T) -> RenderResult<()>,
    {
        let cmd = self.command_buffer;

        backend.reset_fence(self.fence)?;
        backend.reset_command_buffer(cmd)?;
        backend.begin_command_buffer(cmd)?;

        record(backend, cmd, payload)?;

        backend.end_command_buffer(cmd)?;
        backend.submit(&Submission {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;

        backend.wait_for_fence(self.fence, self.timeout_ns)?;
        debug!("Immediate submission completed");
        Ok(())
    }

    /// Uploads `bytes` into a new device-local buffer with `usage | TRANSFER_DST`.
    ///
    /// The bytes go through a host-visible staging buffer that is destroyed
    /// before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EmptyUpload`] for empty input; creation,
    /// submission and wait failures are propagated.
    pub fn upload_buffer<B: GpuBackend>(
        &mut self,
        backend: &B,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &'static str,
    ) -> RenderResult<B::Buffer> {
        if bytes.is_empty() {
            return Err(RenderError::EmptyUpload);
        }
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = backend.create_buffer(&BufferDesc::staging(size))?;
        if let Err(e) = staging.write(0, bytes) {
            backend.destroy_buffer(staging);
            return Err(e.into());
        }

        let destination = match backend.create_buffer(&BufferDesc {
            size,
            usage: usage | vk::BufferUsageFlags::TRANSFER_DST,
            residency: MemoryResidency::GpuOnly,
            name,
        }) {
            Ok(buffer) => buffer,
            Err(e) => {
                backend.destroy_buffer(staging);
                return Err(e.into());
            }
        };

        let handles = (staging.handle(), destination.handle());
        let copied = self.submit_and_wait(backend, &handles, |backend, cmd, &(src, dst)| {
            let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(size);
            backend.cmd_copy_buffer(cmd, src, dst, &[region]);
            Ok(())
        });
        backend.destroy_buffer(staging);

        match copied {
            Ok(()) => {
                debug!("Uploaded {} bytes to {} buffer", size, name);
                Ok(destination)
            }
            Err(e) => {
                backend.destroy_buffer(destination);
                Err(e)
            }
        }
    }

    /// Wait bound for submissions, in nanoseconds.
    #[inline]
    pub fn timeout_ns(&self) -> u64 {
        self.timeout_ns
    }

    /// Destroys the fence and command pool. The device must be idle.
    pub fn destroy<B: GpuBackend>(self, backend: &B) {
        backend.destroy_fence(self.fence);
        backend.destroy_command_pool(self.command_pool);
        debug!("Immediate submit context destroyed");
    }
}
