//! Global atomic counters for run-level observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Counters::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a batch of runs).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters singleton.
pub static COUNTERS: Counters = Counters::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Counters {
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    runs_skipped: AtomicU64,
    stats_generated: AtomicU64,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_skipped: AtomicU64::new(0),
            stats_generated: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "runs_completed", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "runs_failed", "counter incremented");
    }

    pub fn inc_runs_skipped(&self) {
        self.runs_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "runs_skipped", "counter incremented");
    }

    /// Add `n` to the number of aggregated stats produced.
    pub fn add_stats_generated(&self, n: u64) {
        self.stats_generated.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            counter = "flush",
            runs_completed = self.runs_completed(),
            runs_failed = self.runs_failed(),
            runs_skipped = self.runs_skipped(),
            stats_generated = self.stats_generated(),
        );
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_skipped(&self) -> u64 {
        self.runs_skipped.load(Ordering::Relaxed)
    }

    pub fn stats_generated(&self) -> u64 {
        self.stats_generated.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_completed.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_skipped.store(0, Ordering::Relaxed);
        self.stats_generated.store(0, Ordering::Relaxed);
    }
}
