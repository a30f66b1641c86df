//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate sits between the frame core and `ash`:
//! - Backend traits the core is generic over ([`backend`])
//! - The Vulkan implementation of those traits on a host-created device
//! - Allocator-backed buffers and images (gpu-allocator)
//! - Descriptor layout and write helpers
//! - Swapchain management behind the [`backend::Presenter`] trait

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult, vk_check};

// Re-export ash types that users might need
pub use ash::vk;
