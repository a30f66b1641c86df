//! Frame core error types.

use renderer_rhi::RhiError;
use thiserror::Error;

/// Errors escalated by the frame core.
///
/// Recoverable presentation conditions (an out-of-date swapchain at acquire
/// or present) never become a `RenderError`; the scheduler turns them into a
/// resize request and reports a skipped frame instead.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failure reported by the device, allocator or swapchain.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// A freshly created descriptor pool could not satisfy one allocation.
    #[error("Descriptor pool exhausted: a fresh pool of {sets_per_pool} sets rejected the allocation")]
    DescriptorPoolExhausted {
        /// Capacity of the pool that failed.
        sets_per_pool: u32,
    },

    /// A compute effect index past the end of the effect list.
    #[error("Effect index {index} out of range (have {count})")]
    EffectOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of registered effects.
        count: usize,
    },

    /// An upload was requested with no bytes.
    #[error("Upload of zero bytes")]
    EmptyUpload,

    /// A host-registered teardown guard failed.
    #[error("Teardown failed: {0}")]
    Teardown(String),
}

impl RenderError {
    /// Returns true if the host should stop rendering.
    ///
    /// Argument errors leave the renderer untouched. Everything else means
    /// the device or the frame loop is in an unknown state.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RenderError::EffectOutOfRange { .. } | RenderError::EmptyUpload
        )
    }
}

/// Result type alias for frame core operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
