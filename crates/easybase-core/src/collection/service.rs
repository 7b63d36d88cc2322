//! Schema registry service
//!
//! [`CollectionService`] owns collection lifecycle (table, index, metadata,
//! registry entry) and record CRUD. Record writes hit the relational store
//! synchronously and are handed to the [`SyncEngine`] for propagation.

use std::sync::Arc;

use easybase_search::request::SearchRequest;
use easybase_search::SearchIndex;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    CollectionDefinition, CollectionRegistry, FieldDefinition, Page, Pagination, Record,
    AUDIT_COLUMNS, ID_FIELD,
};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::sync::SyncEngine;

/// Collection lifecycle and record CRUD
pub struct CollectionService {
    store: Store,
    index: Arc<dyn SearchIndex>,
    registry: Arc<CollectionRegistry>,
    engine: Arc<SyncEngine>,
    ready: OnceCell<()>,
}

impl std::fmt::Debug for CollectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionService")
            .field("store", &self.store.name())
            .field("index", &self.index.name())
            .field("collections", &self.registry.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl CollectionService {
    /// Service over shared collaborators
    pub fn new(
        store: Store,
        index: Arc<dyn SearchIndex>,
        registry: Arc<CollectionRegistry>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        Self {
            store,
            index,
            registry,
            engine,
            ready: OnceCell::new(),
        }
    }

    /// Service with a fresh registry and an engine built from `config`
    pub fn build(store: Store, index: Arc<dyn SearchIndex>, config: SyncConfig) -> Self {
        let registry = Arc::new(CollectionRegistry::new());
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&registry),
            config,
        ));
        Self::new(store, index, registry, engine)
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    /// Sync engine fed by record writes
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Whether `initialize` has completed
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Create the metadata tables and load persisted definitions
    ///
    /// Runs once; later calls return immediately. A failed attempt may be
    /// retried.
    pub async fn initialize(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.store.bootstrap().await?;
                let definitions = self.store.load_definitions().await?;
                let count = definitions.len();
                for definition in definitions {
                    debug!(collection = %definition.name, "Loaded collection definition");
                    self.registry.insert(definition);
                }
                info!(store = self.store.name(), collections = count, "Collection registry ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn definition(&self, name: &str) -> Result<Arc<CollectionDefinition>> {
        self.registry
            .get(name)
            .ok_or_else(|| Error::not_found(format!("collection '{}'", name)))
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Create the table, the index and the metadata for a new collection
    ///
    /// A failure after the table exists undoes the steps already taken
    /// before the error is returned.
    pub async fn create_collection(
        &self,
        name: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<Arc<CollectionDefinition>> {
        self.create_definition(CollectionDefinition::new(name, fields))
            .await
    }

    /// [`create_collection`](Self::create_collection) for a prepared definition
    pub async fn create_definition(
        &self,
        definition: CollectionDefinition,
    ) -> Result<Arc<CollectionDefinition>> {
        self.ensure_ready()?;
        definition.validate()?;
        let name = definition.name.clone();
        if self.registry.contains(&name) {
            return Err(Error::AlreadyExists(format!("collection '{}'", name)));
        }

        self.store.create_table(&definition).await?;
        debug!(collection = %name, table = %definition.table_name, "Created table");

        if let Err(e) = self
            .index
            .create_index(&definition.index_name, &definition.index_mapping())
            .await
        {
            error!(collection = %name, error = %e, "Failed to create index, dropping table");
            self.undo_table(&definition).await;
            return Err(e.into());
        }
        debug!(collection = %name, index = %definition.index_name, "Created index");

        if let Err(e) = self.store.save_definition(&definition).await {
            error!(collection = %name, error = %e, "Failed to save metadata, dropping index and table");
            self.undo_index(&definition).await;
            self.undo_table(&definition).await;
            return Err(e);
        }

        if !self.registry.try_insert(definition) {
            return Err(Error::AlreadyExists(format!("collection '{}'", name)));
        }
        info!(collection = %name, "Created collection");
        self.definition(&name)
    }

    async fn undo_table(&self, definition: &CollectionDefinition) {
        if let Err(e) = self.store.drop_table(definition).await {
            error!(table = %definition.table_name, error = %e, "Failed to drop table during rollback");
        }
    }

    async fn undo_index(&self, definition: &CollectionDefinition) {
        if let Err(e) = self.index.delete_index(&definition.index_name).await {
            error!(index = %definition.index_name, error = %e, "Failed to delete index during rollback");
        }
    }

    /// Register a definition in memory without touching either store
    ///
    /// Replaces any definition registered under the same name.
    pub fn register_definition(&self, definition: CollectionDefinition) -> Result<()> {
        definition.validate()?;
        let name = definition.name.clone();
        if self.registry.insert(definition).is_some() {
            warn!(collection = %name, "Replaced registered collection definition");
        } else {
            info!(collection = %name, "Registered collection definition");
        }
        Ok(())
    }

    /// Work out which of `fields` are new to the collection
    ///
    /// Existing tables and indices are not migrated; the current definition
    /// is returned unchanged.
    pub async fn update_collection(
        &self,
        name: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<Arc<CollectionDefinition>> {
        let definition = self.definition(name)?;
        let new_fields: Vec<&str> = definition
            .new_fields(&fields)
            .into_iter()
            .map(|f| f.name.as_str())
            .collect();
        if new_fields.is_empty() {
            debug!(collection = %name, "No new fields");
        } else {
            // TODO: ALTER TABLE ADD COLUMN plus a put-mapping call for new fields
            warn!(
                collection = %name,
                fields = ?new_fields,
                "Schema migration is not supported, new fields ignored"
            );
        }
        Ok(definition)
    }

    /// Drop the table, the index and the metadata, then forget the collection
    /// and its pending sync work
    ///
    /// Returns `false` for an unknown collection or when any step fails.
    pub async fn delete_collection(&self, name: &str) -> bool {
        let Some(definition) = self.registry.get(name) else {
            debug!(collection = %name, "Delete of unknown collection");
            return false;
        };

        let result: Result<()> = async {
            self.store.drop_table(&definition).await?;
            self.index.delete_index(&definition.index_name).await?;
            self.store.delete_definition(&definition).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.registry.remove(name);
                self.engine.forget_collection(name);
                info!(collection = %name, "Deleted collection");
                true
            }
            Err(e) => {
                error!(collection = %name, error = %e, "Failed to delete collection");
                false
            }
        }
    }

    /// Definition by name
    pub fn get_collection(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.registry.get(name)
    }

    /// Every registered definition, sorted by name
    pub fn list_collections(&self) -> Vec<Arc<CollectionDefinition>> {
        self.registry.list()
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Insert a record and queue it for indexing
    ///
    /// A missing id is generated (UUID v4); absent fields take their
    /// declared defaults.
    pub async fn create_record(&self, name: &str, data: Record) -> Result<Record> {
        let definition = self.definition(name)?;
        let mut record = data;
        if record.id().is_none() {
            record.set_id(Uuid::new_v4().to_string());
        }
        check_known_fields(&definition, &record)?;

        for field in &definition.fields {
            if record.contains(&field.name) {
                continue;
            }
            if let Some(value) = field.default()? {
                record.insert(field.name.clone(), value);
            }
        }
        check_required_fields(&definition, &record)?;

        let record = record.coerce(&definition)?;
        let id = record.id().unwrap_or_default();
        if let Err(e) = self.store.insert(&definition, &record).await {
            if e.is_duplicate_key() {
                return Err(Error::AlreadyExists(format!(
                    "record '{}' in collection '{}'",
                    id, name
                )));
            }
            return Err(e);
        }

        debug!(collection = %name, id = %id, "Created record");
        self.engine.sync_record(name, record.clone()).await?;
        Ok(record)
    }

    /// Update the given fields of a record and queue the full row for indexing
    ///
    /// Fields not present in `data` keep their values.
    pub async fn update_record(&self, name: &str, id: &str, data: Record) -> Result<Record> {
        let definition = self.definition(name)?;
        let mut changes = data;
        changes.remove(ID_FIELD);
        check_known_fields(&definition, &changes)?;
        for field in definition.fields.iter().filter(|f| !f.nullable) {
            if changes.get(&field.name).is_some_and(|v| v.is_null()) {
                return Err(Error::validation(format!(
                    "field '{}' cannot be null",
                    field.name
                )));
            }
        }
        let changes = changes.coerce(&definition)?;

        let updated = self.store.update(&definition, id, &changes).await?;
        if updated == 0 {
            return Err(Error::not_found(format!(
                "record '{}' in collection '{}'",
                id, name
            )));
        }

        let record = match self.store.fetch(&definition, id).await? {
            Some(row) => row,
            None => {
                warn!(collection = %name, id = %id, "Updated record vanished before re-read");
                let mut partial = changes;
                partial.set_id(id);
                partial
            }
        };
        debug!(collection = %name, id = %id, "Updated record");
        self.engine.sync_record(name, record.clone()).await?;
        Ok(record)
    }

    /// Record by id, read from the relational store
    pub async fn get_record(&self, name: &str, id: &str) -> Result<Option<Record>> {
        let definition = self.definition(name)?;
        self.store.fetch(&definition, id).await
    }

    /// Delete a record; the index delete is queued only when a row went away
    pub async fn delete_record(&self, name: &str, id: &str) -> Result<bool> {
        let definition = self.definition(name)?;
        let deleted = self.store.delete(&definition, id).await?;
        if deleted == 0 {
            return Ok(false);
        }
        debug!(collection = %name, id = %id, "Deleted record");
        self.engine.delete_record(name, id).await;
        Ok(true)
    }

    /// Query the collection's index
    ///
    /// `text` is a fuzzy full-text match across all fields; `filter` and
    /// `sort` use the filter and sort expression languages of
    /// `easybase-search`. Results reflect the index, which trails the
    /// relational store by up to one batch interval.
    pub async fn search(
        &self,
        name: &str,
        text: Option<&str>,
        filter: Option<&str>,
        sort: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Record>> {
        let definition = self.definition(name)?;

        let mut request = SearchRequest::new().page(pagination.page, pagination.size);
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            request = request.text(text);
        }
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            request = request.filter(filter);
        }
        if let Some(sort) = sort.filter(|s| !s.trim().is_empty()) {
            request = request.sort(sort);
        }

        let response = self.index.search(&definition.index_name, &request).await?;
        let items = response
            .hits
            .into_iter()
            .map(|hit| {
                let mut record = Record::from_map(&hit.source);
                record.set_id(hit.id);
                match record.clone().coerce(&definition) {
                    Ok(typed) => typed,
                    Err(e) => {
                        warn!(collection = %name, error = %e, "Indexed document does not match definition");
                        record
                    }
                }
            })
            .collect();

        Ok(Page::new(items, pagination, response.total))
    }
}

fn check_known_fields(definition: &CollectionDefinition, record: &Record) -> Result<()> {
    for (name, _) in record.iter() {
        if AUDIT_COLUMNS.contains(&name) {
            return Err(Error::validation(format!(
                "field '{}' is managed by the store",
                name
            )));
        }
        if definition.field(name).is_none() {
            return Err(Error::validation(format!(
                "unknown field '{}' for collection '{}'",
                name, definition.name
            )));
        }
    }
    Ok(())
}

fn check_required_fields(definition: &CollectionDefinition, record: &Record) -> Result<()> {
    for field in definition.fields.iter().filter(|f| !f.nullable) {
        if record.get(&field.name).map_or(true, |v| v.is_null()) {
            return Err(Error::validation(format!(
                "missing required field: {}",
                field.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::FieldType;
    use crate::store::MemoryRecordStore;
    use easybase_search::memory::MemoryIndex;

    fn service() -> CollectionService {
        CollectionService::build(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryIndex::new()),
            SyncConfig::default(),
        )
    }

    fn fields() -> Vec<FieldDefinition> {
        vec![
            FieldDefinition::new("title", FieldType::String).not_null(),
            FieldDefinition::new("pages", FieldType::Integer).with_default("1"),
        ]
    }

    #[tokio::test]
    async fn test_create_requires_initialize() {
        let service = service();
        let err = service.create_collection("books", fields()).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));

        service.initialize().await.unwrap();
        service.initialize().await.unwrap();
        assert!(service.create_collection("books", fields()).await.is_ok());
    }

    #[tokio::test]
    async fn test_required_and_unknown_fields() {
        let service = service();
        service.initialize().await.unwrap();
        service.create_collection("books", fields()).await.unwrap();

        let err = service
            .create_record("books", Record::new().with("pages", 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("title")));

        let err = service
            .create_record("books", Record::new().with("title", "x").with("isbn", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("isbn")));
    }

    #[tokio::test]
    async fn test_defaults_and_generated_id() {
        let service = service();
        service.initialize().await.unwrap();
        service.create_collection("books", fields()).await.unwrap();

        let record = service
            .create_record("books", Record::new().with("title", "Dune"))
            .await
            .unwrap();
        let id = record.id().unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(record.get("pages"), Some(&easybase_rdbc::Value::Int32(1)));
        assert_eq!(service.engine().queue_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let service = service();
        service.initialize().await.unwrap();
        let err = service.get_record("nope", "1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!service.delete_collection("nope").await);
    }
}
