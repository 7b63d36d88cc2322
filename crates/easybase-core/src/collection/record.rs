//! Records: named scalar values belonging to one collection

use std::collections::BTreeMap;

use easybase_rdbc::types::Row;
use easybase_rdbc::Value;
use serde_json::Map;

use super::definition::{CollectionDefinition, AUDIT_COLUMNS, ID_FIELD};
use crate::error::{Error, Result};

/// A record: field name to value, always addressed by its `id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Remove a field
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Whether the field is set (possibly to NULL)
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The record id, if set to a non-empty value
    pub fn id(&self) -> Option<String> {
        self.get(ID_FIELD)
            .and_then(Value::as_string)
            .filter(|id| !id.is_empty())
    }

    /// Set the record id
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    /// JSON object document
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Untyped record from a JSON object
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(Error::validation(format!(
                "record must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Untyped record from a JSON map
    pub fn from_map(map: &Map<String, serde_json::Value>) -> Self {
        map.iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect()
    }

    /// Record from a result row
    ///
    /// Columns are matched case-insensitively against the definition and
    /// keyed by the declared field name; other columns (audit timestamps,
    /// columns added out of band) are keyed by their lower-cased name.
    pub fn from_row(row: Row, definition: &CollectionDefinition) -> Self {
        row.into_map()
            .into_iter()
            .map(|(column, value)| {
                let name = definition
                    .fields
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case(&column))
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| column.to_lowercase());
                (name, value)
            })
            .collect()
    }

    /// Coerce every known field to its declared type
    ///
    /// Audit columns become timestamps when they parse as one; fields the
    /// definition does not know are kept as they are.
    pub fn coerce(self, definition: &CollectionDefinition) -> Result<Self> {
        self.fields
            .into_iter()
            .map(|(name, value)| {
                let value = match definition.field(&name) {
                    Some(field) => field.field_type.coerce(&name, value)?,
                    None if AUDIT_COLUMNS.contains(&name.as_str()) => {
                        value.as_datetime().map(Value::DateTime).unwrap_or(value)
                    }
                    None => value,
                };
                Ok((name, value))
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::field::{FieldDefinition, FieldType};
    use serde_json::json;

    fn orders() -> CollectionDefinition {
        CollectionDefinition::new(
            "orders",
            vec![
                FieldDefinition::new("id", FieldType::Uuid).primary_key(),
                FieldDefinition::new("total", FieldType::Double),
                FieldDefinition::new("quantity", FieldType::Integer),
                FieldDefinition::new("status", FieldType::String),
            ],
        )
    }

    #[test]
    fn test_id() {
        let record = Record::new().with("id", "a1");
        assert_eq!(record.id().as_deref(), Some("a1"));
        assert_eq!(Record::new().with("id", "").id(), None);
        assert_eq!(Record::new().with("id", Value::Null).id(), None);

        let mut record = Record::new();
        record.set_id("b2");
        assert_eq!(record.id().as_deref(), Some("b2"));
    }

    #[test]
    fn test_json_conversion() {
        let record = Record::from_json(&json!({"id": "a1", "total": 42.5, "status": "NEW"})).unwrap();
        assert_eq!(record.get("total"), Some(&Value::Float64(42.5)));
        assert_eq!(
            record.to_json(),
            json!({"id": "a1", "total": 42.5, "status": "NEW"})
        );
        assert!(Record::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_coerce_with_definition() {
        let record = Record::from_json(&json!({
            "id": "a1",
            "total": "42.5",
            "quantity": 3,
            "created_date": "2024-05-01T10:00:00",
            "extra": true
        }))
        .unwrap()
        .coerce(&orders())
        .unwrap();

        assert_eq!(record.get("total"), Some(&Value::Float64(42.5)));
        assert_eq!(record.get("quantity"), Some(&Value::Int32(3)));
        assert!(matches!(record.get("created_date"), Some(Value::DateTime(_))));
        assert_eq!(record.get("extra"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_coerce_rejects_bad_value() {
        let record = Record::new().with("quantity", "lots");
        assert!(matches!(
            record.coerce(&orders()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_from_row_uses_declared_names() {
        let row = Row::new(
            vec!["ID".into(), "Total".into(), "MODIFIED_DATE".into()],
            vec![
                Value::String("a1".into()),
                Value::Float64(1.0),
                Value::String("2024-05-01T10:00:00".into()),
            ],
        );
        let record = Record::from_row(row, &orders());
        assert_eq!(record.id().as_deref(), Some("a1"));
        assert!(record.contains("total"));
        assert!(record.contains("modified_date"));
    }

    #[test]
    fn test_from_row_keeps_camel_case_fields() {
        let definition = CollectionDefinition::new(
            "carts",
            vec![
                FieldDefinition::new("id", FieldType::String).primary_key(),
                FieldDefinition::new("itemCount", FieldType::Integer),
            ],
        );
        for column in ["itemCount", "itemcount", "ITEMCOUNT"] {
            let row = Row::new(
                vec!["id".into(), column.into()],
                vec![Value::String("a1".into()), Value::Int64(5)],
            );
            let record = Record::from_row(row, &definition)
                .coerce(&definition)
                .unwrap();
            assert_eq!(record.get("itemCount"), Some(&Value::Int32(5)), "{column}");
            assert!(!record.contains("itemcount"));
        }
    }
}
