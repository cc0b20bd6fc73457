//! Admission control: a one-way stop latch plus a queue-depth
//! predicate. Middleware consults both before letting a write through.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct AdmissionGate {
    stopping: AtomicBool,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the graceful-stop latch. The latch is never cleared for
    /// the lifetime of the process.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Writes are refused while the dirty queue sits at or above the
    /// configured threshold.
    pub fn queue_overloaded(&self, depth: usize, threshold: usize) -> bool {
        threshold > 0 && depth >= threshold
    }
}
