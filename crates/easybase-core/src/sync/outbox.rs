//! Transaction outbox
//!
//! Operations recorded while a caller's transaction is open are held here
//! and reach the engine only when the transaction boundary reports a
//! commit. Discarding (or dropping) the outbox forgets them, so a rolled
//! back write is never propagated.

use tracing::debug;

use super::engine::SyncEngine;
use super::operation::SyncOperation;
use crate::collection::Record;
use crate::error::{Error, Result};

/// Pending operations of one caller transaction
#[derive(Debug)]
pub struct SyncOutbox<'a> {
    engine: &'a SyncEngine,
    pending: Vec<SyncOperation>,
}

impl<'a> SyncOutbox<'a> {
    pub(crate) fn new(engine: &'a SyncEngine) -> Self {
        Self {
            engine,
            pending: Vec::new(),
        }
    }

    /// Index `record` after commit; the record must carry an id
    pub fn record(&mut self, collection: &str, record: Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::validation("cannot sync a record without an id"))?;
        self.pending
            .push(SyncOperation::index(collection, id, record));
        Ok(())
    }

    /// Delete the document `id` after commit
    pub fn delete(&mut self, collection: &str, id: impl Into<String>) {
        self.pending.push(SyncOperation::delete(collection, id));
    }

    /// Number of pending operations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The transaction committed: hand everything to the engine
    ///
    /// Returns the number of operations enqueued.
    pub async fn on_committed(mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for op in pending {
            self.engine.enqueue(op).await;
        }
        count
    }

    /// The transaction rolled back: forget everything
    ///
    /// Returns the number of operations dropped.
    pub fn discard(mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

impl Drop for SyncOutbox<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                count = self.pending.len(),
                "Outbox dropped without commit, discarding operations"
            );
        }
    }
}
