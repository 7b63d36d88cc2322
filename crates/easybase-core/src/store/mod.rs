//! Relational persistence for collections
//!
//! - **Sql**: tables and metadata in a relational database through
//!   `easybase-rdbc`
//! - **Memory**: in-process tables for tests and `--memory` dev mode
//!
//! Metadata lives in two tables: `eb_collection_metadata` (one row per
//! collection) and `eb_field_metadata` (one row per field, keyed by the
//! collection's table name).

mod memory;
mod sql;

pub use memory::MemoryRecordStore;
pub use sql::{SqlRecordStore, COLLECTION_METADATA_DDL, FIELD_METADATA_DDL};

use std::sync::Arc;

use async_trait::async_trait;

use crate::collection::{CollectionDefinition, Record};
use crate::error::Result;

/// Relational side of a collection: DDL, metadata and record CRUD
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Create the metadata tables if they do not exist
    async fn bootstrap(&self) -> Result<()>;

    /// Every persisted collection definition, sorted by name
    async fn load_definitions(&self) -> Result<Vec<CollectionDefinition>>;

    /// Persist a definition and its fields
    async fn save_definition(&self, definition: &CollectionDefinition) -> Result<()>;

    /// Remove a definition's metadata rows
    async fn delete_definition(&self, definition: &CollectionDefinition) -> Result<()>;

    /// Names in `eb_collection_metadata`, sorted
    async fn collection_names(&self) -> Result<Vec<String>>;

    /// Create the collection's table
    async fn create_table(&self, definition: &CollectionDefinition) -> Result<()>;

    /// Drop the collection's table if it exists
    async fn drop_table(&self, definition: &CollectionDefinition) -> Result<()>;

    /// Insert a record (its fields must already be coerced)
    async fn insert(&self, definition: &CollectionDefinition, record: &Record) -> Result<()>;

    /// Update the given fields of a record and touch `modified_date`
    ///
    /// Returns the number of rows affected.
    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: &str,
        record: &Record,
    ) -> Result<u64>;

    /// Record by id
    async fn fetch(&self, definition: &CollectionDefinition, id: &str) -> Result<Option<Record>>;

    /// Delete a record, returning the number of rows affected
    async fn delete(&self, definition: &CollectionDefinition, id: &str) -> Result<u64>;

    /// Number of rows
    async fn count(&self, definition: &CollectionDefinition) -> Result<u64>;

    /// Every record id
    async fn ids(&self, definition: &CollectionDefinition) -> Result<Vec<String>>;

    /// Every record
    async fn fetch_all(&self, definition: &CollectionDefinition) -> Result<Vec<Record>>;
}

/// Shared record store handle
pub type Store = Arc<dyn RecordStore>;
