//! Synchronization engine
//!
//! Committed relational writes reach the search index through three
//! stages:
//!
//! 1. **Enqueue**: `sync_*` / `delete_*` push onto a bounded main queue.
//!    A full queue degrades to an immediate single-item bulk.
//! 2. **Batch drain** (`process_batches`): up to `batch_size` operations are
//!    grouped by collection and sent as one bulk request per collection.
//!    Failed items go to a per-collection retry queue.
//! 3. **Retry drain** (`process_retries`): retry queues go through the same
//!    apply path; an operation is abandoned after `max_retries` retries.
//!
//! Every accepted operation gets a monotonic sequence number. The engine
//! tracks the latest sequence per `(collection, id)` while operations for
//! that record are in flight; an operation older than the latest one is
//! dropped as superseded, so the last write to a record wins.
//!
//! The consistency sweep (`verify_consistency`, `repair_inconsistencies`,
//! `check_all_collections`) bounds whatever drift the queues lose.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use easybase_search::bulk::BulkOperation;
use easybase_search::SearchIndex;
use tracing::{debug, error, info, warn};

use super::handle::SyncHandle;
use super::operation::SyncOperation;
use super::outbox::SyncOutbox;
use super::queue::{QueueStats, SyncQueue};
use super::stats::{SyncStats, SyncStatsSnapshot};
use crate::collection::{CollectionDefinition, CollectionRegistry, Record};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::metrics as names;
use crate::store::Store;

type RecordKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct KeyState {
    latest_seq: u64,
    in_flight: u32,
}

/// Propagates relational writes to the search index
pub struct SyncEngine {
    store: Store,
    index: Arc<dyn SearchIndex>,
    registry: Arc<CollectionRegistry>,
    config: SyncConfig,
    queue: SyncQueue<SyncOperation>,
    retry_queues: DashMap<String, SyncQueue<SyncOperation>>,
    next_seq: AtomicU64,
    keys: DashMap<RecordKey, KeyState>,
    stats: SyncStats,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store.name())
            .field("index", &self.index.name())
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("retry_queues", &self.retry_queues.len())
            .finish()
    }
}

impl SyncEngine {
    /// Engine over a record store, a search index and the shared registry
    pub fn new(
        store: Store,
        index: Arc<dyn SearchIndex>,
        registry: Arc<CollectionRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            queue: SyncQueue::bounded(config.queue_capacity),
            store,
            index,
            registry,
            config,
            retry_queues: DashMap::new(),
            next_seq: AtomicU64::new(0),
            keys: DashMap::new(),
            stats: SyncStats::default(),
        }
    }

    /// Engine settings
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Spawn the batch, retry and consistency tasks
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        SyncHandle::spawn(Arc::clone(self))
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Index a record once it reaches the front of the queue
    pub async fn sync_record(&self, collection: &str, record: Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::validation("cannot sync a record without an id"))?;
        self.enqueue(SyncOperation::index(collection, id, record))
            .await;
        Ok(())
    }

    /// Index several records; records without an id are skipped
    ///
    /// Returns the number of operations enqueued.
    pub async fn sync_batch(&self, collection: &str, records: Vec<Record>) -> usize {
        let mut enqueued = 0;
        for record in records {
            match record.id() {
                Some(id) => {
                    self.enqueue(SyncOperation::index(collection, id, record))
                        .await;
                    enqueued += 1;
                }
                None => warn!(collection = %collection, "Skipping record without id"),
            }
        }
        enqueued
    }

    /// Remove a document once it reaches the front of the queue
    pub async fn delete_record(&self, collection: &str, id: &str) {
        self.enqueue(SyncOperation::delete(collection, id)).await;
    }

    /// Remove several documents
    pub async fn delete_batch(&self, collection: &str, ids: &[String]) {
        for id in ids {
            self.enqueue(SyncOperation::delete(collection, id.as_str()))
                .await;
        }
    }

    /// Start collecting operations for a caller transaction
    pub fn outbox(&self) -> SyncOutbox<'_> {
        SyncOutbox::new(self)
    }

    /// Accept an operation: stamp its sequence and queue it
    pub(crate) async fn enqueue(&self, op: SyncOperation) {
        let op = self.accept(op);
        match self.queue.try_push(op) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(names::SYNC_ENQUEUED).increment(1);
                metrics::gauge!(names::SYNC_QUEUE_DEPTH).set(self.queue.len() as f64);
            }
            Err(op) => {
                warn!(
                    collection = %op.collection,
                    id = %op.id,
                    "Sync queue full, applying immediately"
                );
                self.stats.fallback_applied.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(names::SYNC_FALLBACK_APPLIED, "collection" => op.collection.clone())
                    .increment(1);
                self.apply_batch(vec![op]).await;
            }
        }
    }

    fn accept(&self, mut op: SyncOperation) -> SyncOperation {
        op.seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        op.retry_count = 0;
        let mut state = self
            .keys
            .entry((op.collection.clone(), op.id.clone()))
            .or_insert(KeyState {
                latest_seq: 0,
                in_flight: 0,
            });
        state.latest_seq = state.latest_seq.max(op.seq);
        state.in_flight += 1;
        op
    }

    fn record_key(op: &SyncOperation) -> RecordKey {
        (op.collection.clone(), op.id.clone())
    }

    fn is_superseded(&self, op: &SyncOperation) -> bool {
        self.keys
            .get(&Self::record_key(op))
            .is_some_and(|state| op.seq < state.latest_seq)
    }

    /// The operation left the engine (applied, superseded or abandoned)
    fn finish(&self, op: &SyncOperation) {
        if let Entry::Occupied(mut entry) = self.keys.entry(Self::record_key(op)) {
            let state = entry.get_mut();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.in_flight == 0 {
                entry.remove();
            }
        }
    }

    fn discard(&self, op: &SyncOperation) {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(names::SYNC_DISCARDED, "collection" => op.collection.clone())
            .increment(1);
        self.finish(op);
    }

    /// Drop the retry queue and in-flight record state of a deleted collection
    ///
    /// Operations still on the main queue are discarded when drained.
    /// Returns the number of retries dropped.
    pub fn forget_collection(&self, collection: &str) -> usize {
        let dropped = self
            .retry_queues
            .remove(collection)
            .map(|(_, queue)| queue.drain().len())
            .unwrap_or(0);
        self.keys.retain(|(name, _), _| name != collection);
        if dropped > 0 {
            self.stats
                .discarded
                .fetch_add(dropped as u64, Ordering::Relaxed);
            metrics::counter!(names::SYNC_DISCARDED, "collection" => collection.to_string())
                .increment(dropped as u64);
        }
        info!(collection = %collection, dropped, "Forgot sync state of collection");
        dropped
    }

    // ========================================================================
    // Draining
    // ========================================================================

    /// One batch tick: drain up to `batch_size` operations and apply them
    ///
    /// Returns the number of operations drained.
    pub async fn process_batches(&self) -> usize {
        let batch = self.queue.pop_batch(self.config.batch_size);
        metrics::gauge!(names::SYNC_QUEUE_DEPTH).set(self.queue.len() as f64);
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        debug!(count, "Processing sync batch");
        self.apply_batch(batch).await;
        count
    }

    /// One retry tick: drain each collection's retry queue once
    ///
    /// Returns the number of operations drained.
    pub async fn process_retries(&self) -> usize {
        let collections: Vec<String> = self
            .retry_queues
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();

        let mut total = 0;
        for collection in collections {
            let batch = self
                .retry_queues
                .get(&collection)
                .map(|queue| queue.pop_batch(self.config.batch_size))
                .unwrap_or_default();
            if batch.is_empty() {
                continue;
            }
            debug!(collection = %collection, count = batch.len(), "Processing retries");
            total += batch.len();
            self.apply_batch(batch).await;
        }
        total
    }

    /// Drain the main queue until it is empty
    ///
    /// Returns the number of operations drained.
    pub async fn drain_queue(&self) -> usize {
        let mut total = 0;
        loop {
            let drained = self.process_batches().await;
            if drained == 0 {
                return total;
            }
            total += drained;
        }
    }

    async fn apply_batch(&self, ops: Vec<SyncOperation>) {
        let mut groups: BTreeMap<String, Vec<SyncOperation>> = BTreeMap::new();
        for op in ops {
            if !self.registry.contains(&op.collection) {
                debug!(collection = %op.collection, id = %op.id, "Dropping operation for deleted collection");
                self.discard(&op);
                continue;
            }
            if self.is_superseded(&op) {
                debug!(collection = %op.collection, id = %op.id, seq = op.seq, "Dropping superseded operation");
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(names::SYNC_SUPERSEDED, "collection" => op.collection.clone())
                    .increment(1);
                self.finish(&op);
                continue;
            }
            groups.entry(op.collection.clone()).or_default().push(op);
        }

        for (collection, group) in groups {
            self.apply_group(&collection, group).await;
        }
    }

    async fn apply_group(&self, collection: &str, ops: Vec<SyncOperation>) {
        let index = self.registry.index_name(collection);
        let bulk: Vec<BulkOperation> = ops.iter().map(SyncOperation::to_bulk).collect();
        let started = Instant::now();

        match self.index.bulk(&index, &bulk).await {
            Ok(response) => {
                let elapsed = started.elapsed();
                if response.has_errors() {
                    warn!(collection = %collection, failed = response.failed_ids().len(), "Bulk sync had errors");
                }

                let mut applied = 0u64;
                for (i, op) in ops.into_iter().enumerate() {
                    match response.items.get(i) {
                        Some(item) if item.id == op.id && item.is_success() => {
                            applied += 1;
                            self.finish(&op);
                        }
                        Some(item) => {
                            warn!(
                                collection = %collection,
                                id = %op.id,
                                status = item.status,
                                reason = item.error.as_deref().unwrap_or("unknown"),
                                "Failed to sync document"
                            );
                            self.schedule_retry(op);
                        }
                        None => {
                            warn!(collection = %collection, id = %op.id, "Bulk response is missing an item");
                            self.schedule_retry(op);
                        }
                    }
                }

                self.stats.record_batch(applied, elapsed);
                metrics::counter!(names::SYNC_BATCHES, "collection" => collection.to_string())
                    .increment(1);
                metrics::counter!(names::SYNC_APPLIED, "collection" => collection.to_string())
                    .increment(applied);
                metrics::histogram!(names::SYNC_BATCH_DURATION_MS, "collection" => collection.to_string())
                    .record(elapsed.as_secs_f64() * 1000.0);
            }
            Err(e) => {
                error!(
                    collection = %collection,
                    count = ops.len(),
                    error = %e,
                    "Error processing sync batch"
                );
                self.stats.record_batch_failure();
                for op in ops {
                    self.schedule_retry(op);
                }
            }
        }
    }

    fn schedule_retry(&self, mut op: SyncOperation) {
        if op.retry_count >= self.config.max_retries {
            error!(
                collection = %op.collection,
                id = %op.id,
                retries = op.retry_count,
                "Giving up on syncing document"
            );
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(names::SYNC_ABANDONED, "collection" => op.collection.clone())
                .increment(1);
            self.finish(&op);
            return;
        }

        op.retry_count += 1;
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(names::SYNC_RETRIED, "collection" => op.collection.clone()).increment(1);
        debug!(collection = %op.collection, id = %op.id, attempt = op.retry_count, "Scheduling retry");

        let queue = self
            .retry_queues
            .entry(op.collection.clone())
            .or_insert_with(SyncQueue::unbounded);
        if let Err(op) = queue.try_push(op) {
            error!(collection = %op.collection, id = %op.id, "Retry queue closed, dropping operation");
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            drop(queue);
            self.finish(&op);
        }
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    fn definition(&self, collection: &str) -> Option<Arc<CollectionDefinition>> {
        let definition = self.registry.get(collection);
        if definition.is_none() {
            warn!(collection = %collection, "Unknown collection");
        }
        definition
    }

    /// Whether the table's row count matches the index's document count
    ///
    /// Any failure reports `false`.
    pub async fn verify_consistency(&self, collection: &str) -> bool {
        let Some(definition) = self.definition(collection) else {
            return false;
        };

        let db_count = match self.store.count(&definition).await {
            Ok(count) => count,
            Err(e) => {
                error!(collection = %collection, error = %e, "Error verifying consistency");
                return false;
            }
        };
        let index_count = match self.index.count(&definition.index_name).await {
            Ok(count) => count,
            Err(e) => {
                error!(collection = %collection, error = %e, "Error verifying consistency");
                return false;
            }
        };

        info!(collection = %collection, db_count, index_count, "Consistency check");
        db_count == index_count
    }

    /// Queue index operations for rows missing from the index and deletes
    /// for documents missing from the table
    ///
    /// Returns the number of operations queued (those queued before a
    /// failure still count).
    pub async fn repair_inconsistencies(&self, collection: &str) -> usize {
        let Some(definition) = self.definition(collection) else {
            return 0;
        };

        let db_ids: HashSet<String> = match self.store.ids(&definition).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                error!(collection = %collection, error = %e, "Error repairing inconsistencies");
                return 0;
            }
        };
        let index_ids: HashSet<String> = match self.index.all_ids(&definition.index_name).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) if e.is_not_found() => HashSet::new(),
            Err(e) => {
                error!(collection = %collection, error = %e, "Error repairing inconsistencies");
                return 0;
            }
        };

        let mut missing: Vec<&String> = db_ids.difference(&index_ids).collect();
        let mut orphaned: Vec<&String> = index_ids.difference(&db_ids).collect();
        missing.sort();
        orphaned.sort();

        let mut repaired = 0;
        for id in &missing {
            match self.store.fetch(&definition, id).await {
                Ok(Some(record)) => {
                    self.enqueue(SyncOperation::index(collection, id.as_str(), record))
                        .await;
                    repaired += 1;
                }
                Ok(None) => debug!(collection = %collection, id = %id, "Row vanished during repair"),
                Err(e) => {
                    error!(collection = %collection, error = %e, "Error repairing inconsistencies");
                    self.count_repaired(collection, repaired);
                    return repaired;
                }
            }
        }
        for id in &orphaned {
            self.enqueue(SyncOperation::delete(collection, id.as_str()))
                .await;
            repaired += 1;
        }

        info!(
            collection = %collection,
            repaired,
            indexed = missing.len(),
            deleted = orphaned.len(),
            "Repaired inconsistencies"
        );
        self.count_repaired(collection, repaired);
        repaired
    }

    fn count_repaired(&self, collection: &str, repaired: usize) {
        self.stats
            .repaired
            .fetch_add(repaired as u64, Ordering::Relaxed);
        metrics::counter!(names::CONSISTENCY_REPAIRED, "collection" => collection.to_string())
            .increment(repaired as u64);
    }

    /// Recreate the index from the definition's mapping and queue every row
    ///
    /// Returns the number of rows queued, 0 on failure.
    pub async fn reindex_collection(&self, collection: &str) -> usize {
        let Some(definition) = self.definition(collection) else {
            return 0;
        };

        if let Err(e) = self.index.delete_index(&definition.index_name).await {
            error!(collection = %collection, error = %e, "Error reindexing collection");
            return 0;
        }
        if let Err(e) = self
            .index
            .create_index(&definition.index_name, &definition.index_mapping())
            .await
        {
            error!(collection = %collection, error = %e, "Error reindexing collection");
            return 0;
        }
        let records = match self.store.fetch_all(&definition).await {
            Ok(records) => records,
            Err(e) => {
                error!(collection = %collection, error = %e, "Error reindexing collection");
                return 0;
            }
        };

        let count = records.len();
        self.sync_batch(collection, records).await;
        info!(collection = %collection, count, "Reindexed collection");
        count
    }

    /// One sweep tick: verify every persisted collection, repair drift
    ///
    /// Returns the total number of repairs queued.
    pub async fn check_all_collections(&self) -> usize {
        let names = match self.store.collection_names().await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Error in scheduled consistency check");
                return 0;
            }
        };

        let mut total = 0;
        for name in names {
            if !self.verify_consistency(&name).await {
                info!(collection = %name, "Consistency check found drift, repairing");
                total += self.repair_inconsistencies(&name).await;
            }
        }
        total
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Counter snapshot
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    /// Operations waiting on the main queue
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Main queue counters
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Operations waiting for a retry in one collection
    pub fn retry_len(&self, collection: &str) -> usize {
        self.retry_queues
            .get(collection)
            .map_or(0, |queue| queue.len())
    }

    /// Operations waiting for a retry across all collections
    pub fn total_retry_len(&self) -> usize {
        self.retry_queues.iter().map(|q| q.value().len()).sum()
    }

    /// Records with operations still in flight
    pub fn in_flight_records(&self) -> usize {
        self.keys.len()
    }
}
