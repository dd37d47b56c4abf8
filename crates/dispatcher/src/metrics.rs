//! Queue metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lifetime counters of one throttled queue
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Tasks popped from the backlog
    started: AtomicU64,
    /// Tasks that finished (any outcome)
    settled: AtomicU64,
    /// Backlog entries dropped by `clear`
    dropped: AtomicU64,
    /// Highest in-flight count observed
    peak_in_flight: AtomicUsize,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task start with the in-flight count after the start
    pub fn on_start(&self, in_flight: usize) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn on_settle(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_dropped(&self, count: usize) {
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn settled(&self) -> u64 {
        self.settled.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            started: self.started(),
            settled: self.settled(),
            dropped: self.dropped(),
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

/// Snapshot of queue metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub started: u64,
    pub settled: u64,
    pub dropped: u64,
    pub peak_in_flight: usize,
}
