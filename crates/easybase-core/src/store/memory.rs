//! In-memory record store for testing and development

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use easybase_rdbc::Value;

use super::RecordStore;
use crate::collection::{CollectionDefinition, Record, CREATED_DATE, ID_FIELD, MODIFIED_DATE};
use crate::error::{Error, Result};

type Table = BTreeMap<String, Record>;

/// In-memory record store
///
/// Tables are keyed by table name, rows by id. Failures can be injected to
/// exercise compensation and the sync engine's error paths.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: DashMap<String, Table>,
    definitions: DashMap<String, CollectionDefinition>,
    bootstrapped: AtomicBool,
    unavailable: AtomicBool,
    fail_create_table: AtomicUsize,
    fail_save_definition: AtomicUsize,
}

impl MemoryRecordStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` `create_table` calls
    pub fn fail_next_create_table(&self, n: usize) {
        self.fail_create_table.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `save_definition` calls
    pub fn fail_next_save_definition(&self, n: usize) {
        self.fail_save_definition.store(n, Ordering::SeqCst);
    }

    /// Whether `bootstrap` ran
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    /// Whether a table exists
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Whether metadata for a collection is persisted
    pub fn has_definition(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Write a row directly, bypassing validation
    pub fn put_row(&self, table: &str, record: Record) -> bool {
        let Some(id) = record.id() else {
            return false;
        };
        match self.tables.get_mut(table) {
            Some(mut rows) => {
                rows.insert(id, record);
                true
            }
            None => false,
        }
    }

    /// Remove a row directly
    pub fn remove_row(&self, table: &str, id: &str) -> bool {
        self.tables
            .get_mut(table)
            .is_some_and(|mut rows| rows.remove(id).is_some())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(easybase_rdbc::Error::unavailable("injected: database unavailable").into());
        }
        Ok(())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn missing_table(table: &str) -> Error {
        easybase_rdbc::Error::TableNotFound(table.to_string()).into()
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&mut Table) -> T) -> Result<T> {
        self.check_available()?;
        let mut rows = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Self::missing_table(table))?;
        Ok(f(rows.value_mut()))
    }

    fn now() -> Value {
        Value::DateTime(chrono::Utc::now().naive_utc())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn bootstrap(&self) -> Result<()> {
        self.check_available()?;
        self.bootstrapped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_definitions(&self) -> Result<Vec<CollectionDefinition>> {
        self.check_available()?;
        let mut all: Vec<CollectionDefinition> =
            self.definitions.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn save_definition(&self, definition: &CollectionDefinition) -> Result<()> {
        self.check_available()?;
        if Self::take_fault(&self.fail_save_definition) {
            return Err(easybase_rdbc::Error::unavailable("injected: metadata write failed").into());
        }
        if self.definitions.contains_key(&definition.name) {
            return Err(easybase_rdbc::Error::constraint(
                "eb_collection_metadata_pkey",
                format!("duplicate collection '{}'", definition.name),
            )
            .into());
        }
        self.definitions
            .insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn delete_definition(&self, definition: &CollectionDefinition) -> Result<()> {
        self.check_available()?;
        self.definitions.remove(&definition.name);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut names: Vec<String> = self.definitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, definition: &CollectionDefinition) -> Result<()> {
        self.check_available()?;
        if Self::take_fault(&self.fail_create_table) {
            return Err(easybase_rdbc::Error::Schema("injected: CREATE TABLE failed".into()).into());
        }
        if self.tables.contains_key(&definition.table_name) {
            return Err(easybase_rdbc::Error::Schema(format!(
                "table '{}' already exists",
                definition.table_name
            ))
            .into());
        }
        self.tables
            .insert(definition.table_name.clone(), Table::new());
        Ok(())
    }

    async fn drop_table(&self, definition: &CollectionDefinition) -> Result<()> {
        self.check_available()?;
        self.tables.remove(&definition.table_name);
        Ok(())
    }

    async fn insert(&self, definition: &CollectionDefinition, record: &Record) -> Result<()> {
        let id = record
            .id()
            .ok_or_else(|| Error::validation("record has no id"))?;
        let mut row = record.clone();
        row.insert(CREATED_DATE, Self::now());
        row.insert(MODIFIED_DATE, Self::now());

        let inserted = self.with_table(&definition.table_name, |rows| {
            if rows.contains_key(&id) {
                return false;
            }
            rows.insert(id.clone(), row);
            true
        })?;
        if !inserted {
            return Err(easybase_rdbc::Error::constraint(
                format!("{}_pkey", definition.table_name),
                format!("duplicate key {}={}", ID_FIELD, id),
            )
            .into());
        }
        Ok(())
    }

    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: &str,
        record: &Record,
    ) -> Result<u64> {
        self.with_table(&definition.table_name, |rows| match rows.get_mut(id) {
            Some(row) => {
                for (field, value) in record.iter().filter(|(k, _)| *k != ID_FIELD) {
                    row.insert(field, value.clone());
                }
                row.insert(MODIFIED_DATE, Self::now());
                1
            }
            None => 0,
        })
    }

    async fn fetch(&self, definition: &CollectionDefinition, id: &str) -> Result<Option<Record>> {
        self.with_table(&definition.table_name, |rows| rows.get(id).cloned())
    }

    async fn delete(&self, definition: &CollectionDefinition, id: &str) -> Result<u64> {
        self.with_table(&definition.table_name, |rows| {
            u64::from(rows.remove(id).is_some())
        })
    }

    async fn count(&self, definition: &CollectionDefinition) -> Result<u64> {
        self.with_table(&definition.table_name, |rows| rows.len() as u64)
    }

    async fn ids(&self, definition: &CollectionDefinition) -> Result<Vec<String>> {
        self.with_table(&definition.table_name, |rows| rows.keys().cloned().collect())
    }

    async fn fetch_all(&self, definition: &CollectionDefinition) -> Result<Vec<Record>> {
        self.with_table(&definition.table_name, |rows| rows.values().cloned().collect())
    }
}
