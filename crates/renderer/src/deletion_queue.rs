//! Per-frame deferred destruction of GPU resources.
//!
//! A resource that a recorded command buffer still references cannot be
//! destroyed until the GPU has executed that command buffer. Each frame slot
//! owns a [`DeletionQueue`]; resources created during recording are pushed
//! onto it and destroyed by [`DeletionQueue::flush`] the next time the slot
//! comes around, after its fence has been observed signaled.
//!
//! Entries are destroyed in reverse order of insertion, so a resource
//! enqueued after one it depends on is released first.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::backend::{BufferDesc, GpuBackend};
//! use renderer_renderer::deletion_queue::DeletionQueue;
//!
//! # fn example<B: GpuBackend>(backend: &B) -> Result<(), renderer_rhi::RhiError> {
//! let mut queue = DeletionQueue::<B>::new();
//! let staging = backend.create_buffer(&BufferDesc::uniform(256))?;
//! queue.push_buffer(staging);
//!
//! // ... after the slot fence has signaled:
//! queue.flush(backend);
//! assert!(queue.is_empty());
//! # Ok(())
//! # }
//! ```

use tracing::{debug, warn};

use renderer_rhi::backend::{BufferOps, ImageOps};

/// A resource waiting for its frame to retire.
pub enum PendingResource<B: BufferOps + ImageOps> {
    Buffer(B::Buffer),
    Image(B::Image),
}

impl<B: BufferOps + ImageOps> PendingResource<B> {
    fn destroy(self, backend: &B) {
        match self {
            PendingResource::Buffer(buffer) => backend.destroy_buffer(buffer),
            PendingResource::Image(image) => backend.destroy_image(image),
        }
    }
}

/// Resources destroyed once the owning frame slot is finished on the GPU.
pub struct DeletionQueue<B: BufferOps + ImageOps> {
    pending: Vec<PendingResource<B>>,
}

impl<B: BufferOps + ImageOps> DeletionQueue<B> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Appends a resource. Never fails.
    #[inline]
    pub fn enqueue(&mut self, resource: PendingResource<B>) {
        self.pending.push(resource);
    }

    /// Appends a buffer.
    #[inline]
    pub fn push_buffer(&mut self, buffer: B::Buffer) {
        self.enqueue(PendingResource::Buffer(buffer));
    }

    /// Appends an image.
    #[inline]
    pub fn push_image(&mut self, image: B::Image) {
        self.enqueue(PendingResource::Image(image));
    }

    /// Destroys every queued resource, most recent first, and empties the queue.
    ///
    /// The caller must have observed the owning slot's fence signaled.
    pub fn flush(&mut self, backend: &B) {
        if self.pending.is_empty() {
            return;
        }

        let count = self.pending.len();
        while let Some(resource) = self.pending.pop() {
            resource.destroy(backend);
        }
        debug!("Flushed {} deferred resource(s)", count);
    }

    /// Flushes and releases the queue's storage. Shutdown only.
    pub fn destroy(mut self, backend: &B) {
        self.flush(backend);
        self.pending = Vec::new();
    }

    /// Number of queued resources.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<B: BufferOps + ImageOps> Default for DeletionQueue<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BufferOps + ImageOps> Drop for DeletionQueue<B> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Deletion queue dropped with {} pending resource(s); they were leaked",
                self.pending.len()
            );
        }
    }
}
