//! Lightweight peak tracking for pool occupancy.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct PeakTracker {
    peak: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak: AtomicUsize::new(0),
        }
    }

    /// Record a new number of outstanding borrows; updates peak if higher.
    pub fn record_active(&self, active: usize) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while active > cur {
            match self
                .peak
                .compare_exchange(cur, active, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}
