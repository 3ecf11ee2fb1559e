//! Global atomic counters for remediation runs.
//!
//! Counters are incremented silently at the call site. A run takes a
//! [`MetricsSnapshot`] when it starts and calls [`Metrics::flush_since`] at
//! the end, so the emitted event covers that run only even though the
//! counters are process-wide.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub files_mutated: u64,
    pub cascade_items: u64,
    pub checker_timeouts: u64,
}

impl MetricsSnapshot {
    /// Counts accumulated since `earlier`.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.saturating_sub(earlier.attempts),
            files_mutated: self.files_mutated.saturating_sub(earlier.files_mutated),
            cascade_items: self.cascade_items.saturating_sub(earlier.cascade_items),
            checker_timeouts: self.checker_timeouts.saturating_sub(earlier.checker_timeouts),
        }
    }
}

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    attempts: AtomicU64,
    files_mutated: AtomicU64,
    cascade_items: AtomicU64,
    checker_timeouts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            files_mutated: AtomicU64::new(0),
            cascade_items: AtomicU64::new(0),
            checker_timeouts: AtomicU64::new(0),
        }
    }

    /// One fix strategy was executed.
    pub fn inc_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts", "counter incremented");
    }

    /// One applied strategy changed file content.
    pub fn inc_files_mutated(&self) {
        self.files_mutated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "files_mutated", "counter incremented");
    }

    pub fn inc_cascade_items(&self, n: u64) {
        self.cascade_items.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "cascade_items", n, "counter incremented");
    }

    pub fn inc_checker_timeouts(&self) {
        self.checker_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checker_timeouts", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts(),
            files_mutated: self.files_mutated(),
            cascade_items: self.cascade_items(),
            checker_timeouts: self.checker_timeouts(),
        }
    }

    /// Emit the counts accumulated since `start` as a single `info!` event
    /// and return them.
    pub fn flush_since(&self, start: &MetricsSnapshot) -> MetricsSnapshot {
        let delta = self.snapshot().since(start);
        tracing::info!(
            metric = "flush",
            attempts = delta.attempts,
            files_mutated = delta.files_mutated,
            cascade_items = delta.cascade_items,
            checker_timeouts = delta.checker_timeouts,
        );
        delta
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn files_mutated(&self) -> u64 {
        self.files_mutated.load(Ordering::Relaxed)
    }

    pub fn cascade_items(&self) -> u64 {
        self.cascade_items.load(Ordering::Relaxed)
    }

    pub fn checker_timeouts(&self) -> u64 {
        self.checker_timeouts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.files_mutated.store(0, Ordering::Relaxed);
        self.cascade_items.store(0, Ordering::Relaxed);
        self.checker_timeouts.store(0, Ordering::Relaxed);
    }
}
