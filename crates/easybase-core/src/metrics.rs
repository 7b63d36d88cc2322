//! Metric names
//!
//! Emitted through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

/// Operations accepted onto the main queue
pub const SYNC_ENQUEUED: &str = "easybase.sync.enqueued";
/// Operations applied inline because the queue was full
pub const SYNC_FALLBACK_APPLIED: &str = "easybase.sync.fallback_applied";
/// Bulk requests sent
pub const SYNC_BATCHES: &str = "easybase.sync.batches";
/// Documents indexed or deleted
pub const SYNC_APPLIED: &str = "easybase.sync.applied";
/// Retries scheduled
pub const SYNC_RETRIED: &str = "easybase.sync.retried";
/// Operations abandoned after the retry budget
pub const SYNC_ABANDONED: &str = "easybase.sync.abandoned";
/// Operations dropped in favour of a newer one for the same record
pub const SYNC_SUPERSEDED: &str = "easybase.sync.superseded";
/// Operations dropped because their collection was deleted
pub const SYNC_DISCARDED: &str = "easybase.sync.discarded";
/// Main queue depth
pub const SYNC_QUEUE_DEPTH: &str = "easybase.sync.queue_depth";
/// Bulk request latency
pub const SYNC_BATCH_DURATION_MS: &str = "easybase.sync.batch_duration_ms";
/// Drift entries repaired
pub const CONSISTENCY_REPAIRED: &str = "easybase.consistency.repaired";
