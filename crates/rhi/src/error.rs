//! RHI-specific error types.

use std::panic::Location;

use ash::vk;
use thiserror::Error;
use tracing::error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// A fence did not signal within the allotted time.
    #[error("Fence wait timed out after {timeout_ns} ns")]
    FenceTimeout {
        /// Timeout that elapsed, in nanoseconds.
        timeout_ns: u64,
    },

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Host access to memory that is not host-visible.
    #[error("Memory of {0} is not host-visible")]
    MemoryNotMapped(&'static str),

    /// Host access outside the bounds of a buffer.
    #[error("Access of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        /// Byte offset of the access.
        offset: u64,
        /// Length of the access in bytes.
        len: u64,
        /// Size of the buffer in bytes.
        size: u64,
    },
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

/// Converts a raw Vulkan result, logging the caller location on failure.
///
/// Every non-success code that reaches this point is a driver contract
/// violation from the core's point of view, so the location is recorded
/// before the error propagates to the host.
#[track_caller]
pub fn vk_check<T>(result: Result<T, vk::Result>) -> RhiResult<T> {
    let location = Location::caller();
    result.map_err(|code| {
        error!(%location, ?code, "Vulkan call failed");
        RhiError::VulkanError(code)
    })
}
