//! Explicit, ordered shutdown.
//!
//! Long-lived host resources (pipelines, layouts, samplers, default images)
//! are registered with a [`TeardownStack`] as they are created. At shutdown,
//! after the device is idle, the guards run in reverse registration order,
//! so everything is destroyed before what it depends on.

use tracing::{debug, error};

use crate::error::{RenderError, RenderResult};

type Guard<B> = Box<dyn FnOnce(&B) -> RenderResult<()>>;

/// LIFO stack of destruction guards.
pub struct TeardownStack<B: ?Sized> {
    guards: Vec<(&'static str, Guard<B>)>,
}

impl<B: ?Sized> TeardownStack<B> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// Registers a guard. It runs before every guard registered earlier.
    pub fn push(
        &mut self,
        label: &'static str,
        guard: impl FnOnce(&B) -> RenderResult<()> + 'static,
    ) {
        self.guards.push((label, Box::new(guard)));
    }

    /// Runs every guard, most recent first, and empties the stack.
    ///
    /// A failing guard does not stop the remaining ones. The device must be idle.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Teardown`] naming every guard that failed.
    pub fn run(&mut self, backend: &B) -> RenderResult<()> {
        let mut failed = Vec::new();
        while let Some((label, guard)) = self.guards.pop() {
            debug!("Running teardown guard '{}'", label);
            if let Err(e) = guard(backend) {
                error!("Teardown guard '{}' failed: {}", label, e);
                failed.push(label);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(RenderError::Teardown(failed.join(", ")))
        }
    }

    /// Number of registered guards.
    #[inline]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<B: ?Sized> Default for TeardownStack<B> {
    fn default() -> Self {
        Self::new()
    }
}
