//! Frame core of the renderer.
//!
//! This crate schedules frames on top of the `renderer_rhi` backend traits:
//! - Frame slots with their own sync objects, descriptors and deletion queue
//! - Growable descriptor allocation
//! - Synchronous uploads through an immediate-submit context
//! - Swapchain out-of-date recovery
//! - Ordered shutdown
//!
//! Everything is generic over [`renderer_rhi::backend::GpuBackend`] and
//! [`renderer_rhi::backend::Presenter`].

pub mod config;
pub mod deletion_queue;
pub mod descriptor_allocator;
pub mod effects;
mod error;
pub mod frame;
pub mod hooks;
pub mod immediate;
mod renderer;
pub mod scene_data;
pub mod targets;
pub mod teardown;

pub use config::RendererConfig;
pub use error::{RenderError, RenderResult};
pub use hooks::{DrawCommand, FrameContext, FrameHooks};
pub use renderer::{FrameOutcome, FrameStats, Renderer};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
