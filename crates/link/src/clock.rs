//! Monotonic clock anchored at process start.

use std::time::{Duration, Instant};

/// All timers and timestamps in the node are `Duration`s since this
/// anchor, which keeps the state machines free of `Instant` and lets
/// tests inject arbitrary times.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Monotonic time since the anchor.
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Convert a node-relative time back to an `Instant` for condvar waits.
    pub fn instant_at(&self, at: Duration) -> Instant {
        self.origin + at
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
