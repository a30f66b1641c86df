//! Monotonic timer for frame pacing and CPU-side recording costs.

use std::time::{Duration, Instant};

/// Measures elapsed wall time since creation and between laps.
///
/// The renderer keeps one for frame-to-frame time and starts a fresh one
/// around each command recording.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    last_lap: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_lap: now,
        }
    }

    /// Total time since the timer was created or last restarted.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous lap (or creation), then starts a new lap.
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last_lap);
        self.last_lap = now;
        delta
    }

    /// Restarts both the total and the lap clock, returning the total that
    /// had accumulated.
    pub fn restart(&mut self) -> Duration {
        let elapsed = self.elapsed();
        let now = Instant::now();
        self.start = now;
        self.last_lap = now;
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
