//! Shared utilities for the renderer crates.
//!
//! - Logging initialization (`tracing-subscriber`)
//! - [`Timer`] for frame and recording durations

mod logging;
mod timer;

pub use logging::{init_logging, try_init_logging};
pub use timer::Timer;
