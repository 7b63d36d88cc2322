//! Record store over a relational database

use std::sync::Arc;

use async_trait::async_trait;
use easybase_rdbc::connection::Transaction;
use easybase_rdbc::manager::DataSourceManager;
use easybase_rdbc::types::Row;
use easybase_rdbc::Value;
use tracing::{debug, info, warn};

use super::RecordStore;
use crate::collection::{
    CollectionDefinition, FieldDefinition, FieldType, Record, SearchMapping, ID_FIELD,
    MODIFIED_DATE,
};
use crate::error::{Error, Result};

/// Collection metadata table
pub const COLLECTION_METADATA_DDL: &str = "CREATE TABLE IF NOT EXISTS eb_collection_metadata (\
name VARCHAR(255) PRIMARY KEY, \
table_name VARCHAR(255) NOT NULL, \
created_date ${timestamp_column} NOT NULL DEFAULT CURRENT_TIMESTAMP, \
modified_date ${timestamp_column} NOT NULL DEFAULT CURRENT_TIMESTAMP)";

/// Field metadata table
pub const FIELD_METADATA_DDL: &str = "CREATE TABLE IF NOT EXISTS eb_field_metadata (\
id ${auto_increment} PRIMARY KEY, \
collection_name VARCHAR(255) NOT NULL, \
name VARCHAR(255) NOT NULL, \
type VARCHAR(50) NOT NULL, \
is_primary_key BOOLEAN NOT NULL DEFAULT FALSE, \
is_nullable BOOLEAN NOT NULL DEFAULT TRUE, \
search_mapping ${text_column}, \
CONSTRAINT uk_field_collection UNIQUE (collection_name, name))";

const COLLECTION_TABLE: &str = "eb_collection_metadata";
const FIELD_TABLE: &str = "eb_field_metadata";

/// Record store backed by a [`DataSourceManager`]
pub struct SqlRecordStore {
    manager: Arc<DataSourceManager>,
}

impl std::fmt::Debug for SqlRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRecordStore")
            .field("manager", &self.manager)
            .finish()
    }
}

impl SqlRecordStore {
    /// Wrap a data source
    pub fn new(manager: Arc<DataSourceManager>) -> Self {
        Self { manager }
    }

    /// Underlying data source
    pub fn manager(&self) -> &Arc<DataSourceManager> {
        &self.manager
    }

    fn ph(&self, index: usize) -> String {
        self.manager.dialect().placeholder(index)
    }

    /// The id parameter typed like the collection's `id` column
    fn key(definition: &CollectionDefinition, id: &str) -> Result<Value> {
        match definition.field(ID_FIELD) {
            Some(field) => field.field_type.coerce(ID_FIELD, Value::from(id)),
            None => Ok(Value::from(id)),
        }
    }

    fn to_record(definition: &CollectionDefinition, row: Row) -> Result<Record> {
        Record::from_row(row, definition).coerce(definition)
    }

    async fn load_fields(&self, table_name: &str) -> Result<Vec<FieldDefinition>> {
        let sql = format!(
            "SELECT name, type, is_primary_key, is_nullable, search_mapping FROM {} \
             WHERE collection_name = {} ORDER BY id",
            FIELD_TABLE,
            self.ph(1)
        );
        let rows = self.manager.query(&sql, &[Value::from(table_name)]).await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get_by_name("name").and_then(Value::as_string)?;
                let field_type = row
                    .get_by_name("type")
                    .and_then(Value::as_string)
                    .map(|t| FieldType::parse(&t))
                    .unwrap_or(FieldType::String);
                let search_mapping = row
                    .get_by_name("search_mapping")
                    .and_then(Value::as_str)
                    .filter(|raw| !raw.is_empty())
                    .and_then(|raw| match serde_json::from_str::<SearchMapping>(raw) {
                        Ok(mapping) => Some(mapping),
                        Err(e) => {
                            warn!(field = %name, error = %e, "Ignoring unreadable search mapping");
                            None
                        }
                    });

                Some(FieldDefinition {
                    primary_key: row
                        .get_by_name("is_primary_key")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    nullable: row
                        .get_by_name("is_nullable")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                    search_mapping,
                    ..FieldDefinition::new(name, field_type)
                })
            })
            .collect())
    }

    async fn insert_metadata(
        &self,
        tx: &dyn Transaction,
        definition: &CollectionDefinition,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (name, table_name) VALUES ({}, {})",
            COLLECTION_TABLE,
            self.ph(1),
            self.ph(2)
        );
        tx.execute(
            &sql,
            &[
                Value::from(definition.name.as_str()),
                Value::from(definition.table_name.as_str()),
            ],
        )
        .await?;

        let sql = format!(
            "INSERT INTO {} (collection_name, name, type, is_primary_key, is_nullable, search_mapping) \
             VALUES ({}, {}, {}, {}, {}, {})",
            FIELD_TABLE,
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6)
        );
        for field in &definition.fields {
            let search_mapping = field
                .search_mapping
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                &sql,
                &[
                    Value::from(definition.table_name.as_str()),
                    Value::from(field.name.as_str()),
                    Value::from(field.field_type.as_str()),
                    Value::Bool(field.primary_key),
                    Value::Bool(field.nullable),
                    Value::from(search_mapping),
                ],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    fn name(&self) -> &str {
        self.manager.dialect().name()
    }

    async fn bootstrap(&self) -> Result<()> {
        self.manager
            .execute_ddl_for_table(COLLECTION_TABLE, COLLECTION_METADATA_DDL)
            .await?;
        self.manager
            .execute_ddl_for_table(FIELD_TABLE, FIELD_METADATA_DDL)
            .await?;
        debug!("Collection metadata tables ready");
        Ok(())
    }

    async fn load_definitions(&self) -> Result<Vec<CollectionDefinition>> {
        let sql = format!("SELECT name, table_name FROM {} ORDER BY name", COLLECTION_TABLE);
        let rows = self.manager.query(&sql, &[]).await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let (Some(name), Some(table_name)) = (
                row.get_by_name("name").and_then(Value::as_string),
                row.get_by_name("table_name").and_then(Value::as_string),
            ) else {
                warn!("Skipping collection metadata row without name or table");
                continue;
            };
            let fields = self.load_fields(&table_name).await?;
            definitions.push(CollectionDefinition {
                name,
                index_name: table_name.clone(),
                table_name,
                fields,
                metadata: Default::default(),
            });
        }

        info!(count = definitions.len(), "Loaded collection definitions");
        Ok(definitions)
    }

    async fn save_definition(&self, definition: &CollectionDefinition) -> Result<()> {
        let tx = self.manager.begin().await?;
        match self.insert_metadata(tx.as_ref(), definition).await {
            Ok(()) => {
                tx.commit().await?;
                debug!(collection = %definition.name, "Saved collection metadata");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback of collection metadata failed");
                }
                Err(e)
            }
        }
    }

    async fn delete_definition(&self, definition: &CollectionDefinition) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE collection_name = {}", FIELD_TABLE, self.ph(1));
        self.manager
            .execute(&sql, &[Value::from(definition.table_name.as_str())])
            .await?;
        let sql = format!("DELETE FROM {} WHERE name = {}", COLLECTION_TABLE, self.ph(1));
        self.manager
            .execute(&sql, &[Value::from(definition.name.as_str())])
            .await?;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT name FROM {} ORDER BY name", COLLECTION_TABLE);
        let rows = self.manager.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_string))
            .collect())
    }

    async fn create_table(&self, definition: &CollectionDefinition) -> Result<()> {
        let ddl = definition.create_table_sql(self.manager.dialect());
        self.manager.create_table(&definition.table_name, &ddl).await?;
        Ok(())
    }

    async fn drop_table(&self, definition: &CollectionDefinition) -> Result<()> {
        self.manager.drop_table(&definition.table_name).await?;
        Ok(())
    }

    async fn insert(&self, definition: &CollectionDefinition, record: &Record) -> Result<()> {
        let (columns, values): (Vec<&str>, Vec<Value>) =
            record.iter().map(|(k, v)| (k, v.clone())).unzip();
        let sql = self
            .manager
            .dialect()
            .insert_sql(&definition.table_name, &columns);
        self.manager.execute(&sql, &values).await?;
        Ok(())
    }

    async fn update(
        &self,
        definition: &CollectionDefinition,
        id: &str,
        record: &Record,
    ) -> Result<u64> {
        let (columns, mut values): (Vec<&str>, Vec<Value>) = record
            .iter()
            .filter(|(k, _)| *k != ID_FIELD)
            .map(|(k, v)| (k, v.clone()))
            .unzip();
        values.push(Self::key(definition, id)?);
        let sql = self.manager.dialect().update_sql(
            &definition.table_name,
            &columns,
            ID_FIELD,
            Some(MODIFIED_DATE),
        );
        Ok(self.manager.execute(&sql, &values).await?)
    }

    async fn fetch(&self, definition: &CollectionDefinition, id: &str) -> Result<Option<Record>> {
        let sql = self
            .manager
            .dialect()
            .select_sql(&definition.table_name, &[], Some(ID_FIELD));
        let mut rows = self
            .manager
            .query(&sql, &[Self::key(definition, id)?])
            .await?;
        match rows.pop() {
            Some(row) => Ok(Some(Self::to_record(definition, row)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, definition: &CollectionDefinition, id: &str) -> Result<u64> {
        let sql = self
            .manager
            .dialect()
            .delete_sql(&definition.table_name, ID_FIELD);
        Ok(self
            .manager
            .execute(&sql, &[Self::key(definition, id)?])
            .await?)
    }

    async fn count(&self, definition: &CollectionDefinition) -> Result<u64> {
        let sql = self.manager.dialect().count_sql(&definition.table_name);
        let rows = self.manager.query(&sql, &[]).await?;
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Storage(easybase_rdbc::Error::statement(
                    "count returned no value",
                    sql.clone(),
                ))
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn ids(&self, definition: &CollectionDefinition) -> Result<Vec<String>> {
        let sql = self
            .manager
            .dialect()
            .select_sql(&definition.table_name, &[ID_FIELD], None);
        let rows = self.manager.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_string))
            .collect())
    }

    async fn fetch_all(&self, definition: &CollectionDefinition) -> Result<Vec<Record>> {
        let sql = self
            .manager
            .dialect()
            .select_sql(&definition.table_name, &[], None);
        let rows = self.manager.query(&sql, &[]).await?;
        rows.into_iter()
            .map(|row| Self::to_record(definition, row))
            .collect()
    }
}
