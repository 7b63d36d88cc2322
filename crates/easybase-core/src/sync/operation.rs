//! Units of propagation work

use easybase_search::bulk::BulkOperation;

use crate::collection::Record;

/// What to do with the document
#[derive(Debug, Clone, PartialEq)]
pub enum SyncKind {
    /// Index (create or replace) the document
    Index(Record),
    /// Remove the document
    Delete,
}

/// One record's pending change, owned by whichever queue holds it
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOperation {
    /// Enqueue sequence number; 0 until the engine accepts the operation
    pub seq: u64,
    /// Collection name
    pub collection: String,
    /// Record id
    pub id: String,
    /// Index or delete
    pub kind: SyncKind,
    /// Failed attempts so far
    pub retry_count: u32,
}

impl SyncOperation {
    /// Index `record` under `id`
    pub fn index(collection: impl Into<String>, id: impl Into<String>, record: Record) -> Self {
        Self {
            seq: 0,
            collection: collection.into(),
            id: id.into(),
            kind: SyncKind::Index(record),
            retry_count: 0,
        }
    }

    /// Delete the document `id`
    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            seq: 0,
            collection: collection.into(),
            id: id.into(),
            kind: SyncKind::Delete,
            retry_count: 0,
        }
    }

    /// Whether this is a deletion
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, SyncKind::Delete)
    }

    /// `(collection, id)` identifying the target document
    pub fn key(&self) -> (&str, &str) {
        (&self.collection, &self.id)
    }

    /// Bulk request line for this operation
    pub fn to_bulk(&self) -> BulkOperation {
        match &self.kind {
            SyncKind::Index(record) => BulkOperation::index(self.id.clone(), record.to_json()),
            SyncKind::Delete => BulkOperation::delete(self.id.clone()),
        }
    }
}
