//! Collection definitions

use std::collections::{BTreeMap, HashSet};

use easybase_rdbc::dialect::SqlDialect;
use easybase_rdbc::security::validate_sql_identifier;
use easybase_search::mapping::{FieldMapping, IndexMapping};
use serde::{Deserialize, Serialize};

use super::field::{FieldDefinition, FieldType};
use crate::error::{Error, Result};

/// Record identifier field, present in every collection
pub const ID_FIELD: &str = "id";

/// Audit column set on insert
pub const CREATED_DATE: &str = "created_date";

/// Audit column touched on every update
pub const MODIFIED_DATE: &str = "modified_date";

/// Audit columns appended to every table
pub const AUDIT_COLUMNS: [&str; 2] = [CREATED_DATE, MODIFIED_DATE];

const AUDIT_COLUMN_DEFINITION: &str = "TIMESTAMP DEFAULT CURRENT_TIMESTAMP";

/// Shape of a collection: its table, its index and its fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    /// Logical name, unique among registered collections
    pub name: String,
    /// Backing table
    pub table_name: String,
    /// Backing index
    pub index_name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDefinition>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CollectionDefinition {
    /// Definition with the table and index named after the collection
    ///
    /// A `uuid` primary key named `id` is prepended when the fields do not
    /// declare one.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        let name = name.into();
        let table_name = name.to_lowercase();
        let mut fields = fields;
        if !fields.iter().any(|f| f.name == ID_FIELD) {
            fields.insert(0, FieldDefinition::new(ID_FIELD, FieldType::Uuid).primary_key());
        }
        Self {
            index_name: table_name.clone(),
            table_name,
            name,
            fields,
            metadata: BTreeMap::new(),
        }
    }

    /// Override the table name (the index keeps following it unless set)
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        let follows = self.index_name == self.table_name;
        self.table_name = table_name.into();
        if follows {
            self.index_name = self.table_name.clone();
        }
        self
    }

    /// Override the index name
    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = index_name.into();
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Field by name
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Primary key fields in declaration order
    pub fn primary_key(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Candidates whose names are not defined yet
    pub fn new_fields<'a>(&self, candidates: &'a [FieldDefinition]) -> Vec<&'a FieldDefinition> {
        candidates
            .iter()
            .filter(|f| self.field(&f.name).is_none())
            .collect()
    }

    /// Check names are safe identifiers and field names are unique
    pub fn validate(&self) -> Result<()> {
        let check = |what: &str, name: &str| {
            validate_sql_identifier(name)
                .map_err(|e| Error::validation(format!("invalid {} name: {}", what, e)))
        };
        check("collection", &self.name)?;
        check("table", &self.table_name)?;
        if self.index_name.is_empty() || self.index_name != self.index_name.to_lowercase() {
            return Err(Error::validation(format!(
                "index name '{}' must be non-empty and lower-case",
                self.index_name
            )));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            check("field", &field.name)?;
            if AUDIT_COLUMNS.contains(&field.name.to_lowercase().as_str()) {
                return Err(Error::validation(format!(
                    "field name '{}' is reserved",
                    field.name
                )));
            }
            if !seen.insert(field.name.to_lowercase()) {
                return Err(Error::validation(format!(
                    "duplicate field '{}' in collection '{}'",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// `CREATE TABLE` for the fields plus the audit columns
    pub fn create_table_sql(&self, dialect: &dyn SqlDialect) -> String {
        let mut columns: Vec<(&str, String)> = self
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.column_definition()))
            .collect();
        columns.extend(
            AUDIT_COLUMNS
                .iter()
                .map(|c| (*c, AUDIT_COLUMN_DEFINITION.to_string())),
        );
        let pk: Vec<&str> = self.primary_key().iter().map(|f| f.name.as_str()).collect();
        dialect.create_table_sql(&self.table_name, &columns, &pk)
    }

    /// Index mapping for the fields plus the audit dates
    pub fn index_mapping(&self) -> IndexMapping {
        let mut mapping = IndexMapping::new();
        for field in &self.fields {
            mapping.insert(field.name.clone(), field.index_mapping());
        }
        for column in AUDIT_COLUMNS {
            mapping.insert(column, FieldMapping::date());
        }
        mapping
    }
}
