//! Index mappings
//!
//! A mapping is the `properties` object of an index: one [`FieldMapping`]
//! per document field, optionally with sub-fields (multi-fields).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping for a single document field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Index field type (`keyword`, `text`, `date`, ...)
    #[serde(rename = "type")]
    pub field_type: String,

    /// Analyzer for `text` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,

    /// Multi-fields indexed from the same source value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldMapping>,
}

impl FieldMapping {
    /// Mapping of the given type with no analyzer or sub-fields
    pub fn of(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            analyzer: None,
            fields: BTreeMap::new(),
        }
    }

    /// `keyword` mapping
    pub fn keyword() -> Self {
        Self::of("keyword")
    }

    /// `text` mapping
    pub fn text() -> Self {
        Self::of("text")
    }

    /// `date` mapping
    pub fn date() -> Self {
        Self::of("date")
    }

    /// Set the analyzer
    pub fn with_analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// Add a sub-field
    pub fn with_subfield(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.fields.insert(name.into(), mapping);
        self
    }
}

/// Full index mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping {
    /// Field name -> mapping
    pub properties: BTreeMap<String, FieldMapping>,
}

impl IndexMapping {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field mapping
    pub fn with_field(mut self, name: impl Into<String>, mapping: FieldMapping) -> Self {
        self.properties.insert(name.into(), mapping);
        self
    }

    /// Insert a field mapping in place
    pub fn insert(&mut self, name: impl Into<String>, mapping: FieldMapping) {
        self.properties.insert(name.into(), mapping);
    }

    /// Look up a field mapping
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.properties.get(name)
    }

    /// Number of mapped fields
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether no field is mapped
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Create-index request body: `{"mappings":{"properties":{...}}}`
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "mappings": self })
    }
}
