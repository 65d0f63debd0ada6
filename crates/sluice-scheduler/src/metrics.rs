//! Metrics for queue observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the matching loop.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Matching passes that ran to completion.
    pub cycles: AtomicU64,
    /// Matching passes aborted by a lock or storage error.
    pub aborted_cycles: AtomicU64,
    /// Stages handed to a worker.
    pub deliveries: AtomicU64,
    /// Registrations dropped because their caller had gone away.
    pub stale_workers: AtomicU64,
    /// Workers currently waiting.
    pub waiting_workers: AtomicU64,
}

impl QueueMetrics {
    /// Create new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_cycle(&self) {
        self.aborted_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_worker(&self) {
        self.stale_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_waiting_workers(&self, count: usize) {
        self.waiting_workers.store(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            aborted_cycles: self.aborted_cycles.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            stale_workers: self.stale_workers.load(Ordering::Relaxed),
            waiting_workers: self.waiting_workers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of queue metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub cycles: u64,
    pub aborted_cycles: u64,
    pub deliveries: u64,
    pub stale_workers: u64,
    pub waiting_workers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = QueueMetrics::new();
        metrics.record_cycle();
        metrics.record_cycle();
        metrics.record_delivery();
        metrics.set_waiting_workers(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.deliveries, 1);
        assert_eq!(snapshot.waiting_workers, 3);
        assert_eq!(snapshot.aborted_cycles, 0);
    }
}
