//! "N/total" progress notifications at logarithmically spaced counts.

use std::sync::atomic::{AtomicUsize, Ordering};

pub const PROGRESS_TARGET: &str = "xj_dispatch::progress";

/// Counts finished cells and logs at powers of two and at the final cell.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    enabled: bool,
    done: AtomicUsize,
}

impl Progress {
    #[must_use]
    pub fn new(total: usize, enabled: bool) -> Self {
        Self {
            total,
            enabled,
            done: AtomicUsize::new(0),
        }
    }

    /// Record one finished cell.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.enabled && should_report(done, self.total) {
            tracing::info!(target: PROGRESS_TARGET, done, total = self.total, "{done}/{}", self.total);
        }
    }

    #[must_use]
    pub fn finished(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

#[must_use]
pub fn should_report(done: usize, total: usize) -> bool {
    done == total || done.is_power_of_two()
}
