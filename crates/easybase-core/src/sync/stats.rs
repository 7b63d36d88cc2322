//! Sync engine statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, updated by the engine
#[derive(Debug, Default)]
pub struct SyncStats {
    pub enqueued: AtomicU64,
    pub fallback_applied: AtomicU64,
    pub batches: AtomicU64,
    pub failed_batches: AtomicU64,
    pub applied: AtomicU64,
    pub retried: AtomicU64,
    pub abandoned: AtomicU64,
    pub superseded: AtomicU64,
    pub discarded: AtomicU64,
    pub repaired: AtomicU64,
    pub total_batch_time_ms: AtomicU64,
}

impl SyncStats {
    /// Record a bulk request and how many of its items succeeded
    pub fn record_batch(&self, applied: u64, duration: Duration) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.applied.fetch_add(applied, Ordering::Relaxed);
        self.total_batch_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a bulk request that failed at transport level
    pub fn record_batch_failure(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            fallback_applied: self.fallback_applied.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            repaired: self.repaired.load(Ordering::Relaxed),
            total_batch_time_ms: self.total_batch_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SyncStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatsSnapshot {
    /// Operations accepted onto the main queue
    pub enqueued: u64,
    /// Operations applied inline because the queue was full
    pub fallback_applied: u64,
    /// Bulk requests sent
    pub batches: u64,
    /// Bulk requests that failed outright
    pub failed_batches: u64,
    /// Documents successfully indexed or deleted
    pub applied: u64,
    /// Retries scheduled
    pub retried: u64,
    /// Operations given up on
    pub abandoned: u64,
    /// Operations dropped because a newer one for the same record exists
    pub superseded: u64,
    /// Operations dropped because their collection was deleted
    pub discarded: u64,
    /// Drift entries repaired by consistency sweeps
    pub repaired: u64,
    /// Time spent in bulk requests
    pub total_batch_time_ms: u64,
}

impl SyncStatsSnapshot {
    /// Average bulk request latency
    pub fn avg_batch_ms(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.total_batch_time_ms as f64 / self.batches as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = SyncStats::default();
        stats.record_batch(10, Duration::from_millis(40));
        stats.record_batch(5, Duration::from_millis(20));
        stats.record_batch_failure();
        stats.abandoned.fetch_add(1, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.applied, 15);
        assert_eq!(snap.failed_batches, 1);
        assert_eq!(snap.abandoned, 1);
        assert!((snap.avg_batch_ms() - 30.0).abs() < f64::EPSILON);
    }
}
