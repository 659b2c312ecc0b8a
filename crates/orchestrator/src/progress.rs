//! Progress tracking for one probe run

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use subdex_common::progress_percent;

use crate::batcher::BatchOutcome;

pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
    records: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: BatchOutcome, records: usize) {
        let counter = match outcome {
            BatchOutcome::Completed => &self.completed,
            BatchOutcome::TimedOut => &self.timed_out,
            BatchOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records, Ordering::Relaxed);
    }

    /// Batches accounted for, whatever their outcome.
    pub fn reported(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
            + self.timed_out.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }

    pub fn percent(&self) -> u8 {
        progress_percent(self.reported(), self.total.load(Ordering::Relaxed))
    }

    pub fn log_summary(&self, target: &str) {
        let total = self.total.load(Ordering::Relaxed);
        info!("Probe summary for {}:", target);
        info!("  Batches: {}", total);
        info!("  Completed: {}", self.completed.load(Ordering::Relaxed));
        info!("  Timed out: {}", self.timed_out.load(Ordering::Relaxed));
        info!("  Failed: {}", self.failed.load(Ordering::Relaxed));
        info!("  Records: {}", self.records.load(Ordering::Relaxed));
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
