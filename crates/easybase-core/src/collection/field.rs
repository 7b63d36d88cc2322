//! Field definitions and the logical type table
//!
//! Each logical type maps to exactly one relational column type and one
//! default index field type:
//!
//! | logical          | column                  | index   |
//! |------------------|-------------------------|---------|
//! | string           | VARCHAR(length or 255)  | keyword |
//! | integer / int    | INTEGER                 | keyword |
//! | long             | BIGINT                  | keyword |
//! | double           | DOUBLE PRECISION        | keyword |
//! | float            | FLOAT                   | keyword |
//! | boolean          | BOOLEAN                 | keyword |
//! | date             | DATE                    | date    |
//! | datetime         | TIMESTAMP               | date    |
//! | uuid             | VARCHAR(36)             | keyword |
//! | anything else    | VARCHAR(255)            | keyword |
//!
//! A field's search mapping, when present, overrides the default index type.

use std::fmt;

use easybase_rdbc::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Index mapping descriptor attached to a field
pub type SearchMapping = easybase_search::mapping::FieldMapping;

/// Default `VARCHAR` length for strings without an explicit length
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Logical field type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    /// Variable-length text
    String,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    Long,
    /// Double precision float
    Double,
    /// Float
    Float,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
    /// Timestamp without zone
    DateTime,
    /// UUID stored as text
    Uuid,
    /// Unrecognised type name, stored as `VARCHAR(255)`
    Unknown(String),
}

impl FieldType {
    /// Every recognised type
    pub const ALL: [FieldType; 9] = [
        FieldType::String,
        FieldType::Integer,
        FieldType::Long,
        FieldType::Double,
        FieldType::Float,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Uuid,
    ];

    /// Parse a type name (case-insensitive, `int` is an alias of `integer`)
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "string" => Self::String,
            "integer" | "int" => Self::Integer,
            "long" => Self::Long,
            "double" => Self::Double,
            "float" => Self::Float,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "uuid" => Self::Uuid,
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Canonical type name as stored in `eb_field_metadata.type`
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Uuid => "uuid",
            Self::Unknown(name) => name,
        }
    }

    /// Relational column type
    pub fn sql_type(&self, length: Option<u32>) -> String {
        match self {
            Self::String => format!("VARCHAR({})", length.unwrap_or(DEFAULT_STRING_LENGTH)),
            Self::Integer => "INTEGER".to_string(),
            Self::Long => "BIGINT".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Float => "FLOAT".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::DateTime => "TIMESTAMP".to_string(),
            Self::Uuid => "VARCHAR(36)".to_string(),
            Self::Unknown(_) => format!("VARCHAR({})", DEFAULT_STRING_LENGTH),
        }
    }

    /// Index field type used when the field has no search mapping
    pub fn default_index_type(&self) -> &'static str {
        match self {
            Self::Date | Self::DateTime => "date",
            _ => "keyword",
        }
    }

    /// Convert an untyped value into the variant this type is stored as
    ///
    /// `uuid` stays a string since the column is `VARCHAR(36)` and ids are
    /// uuids by convention only.
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        if value == Value::Null {
            return Ok(Value::Null);
        }
        let coerced = match self {
            Self::String | Self::Uuid | Self::Unknown(_) => value.as_string().map(Value::String),
            Self::Integer => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Value::Int32),
            Self::Long => value.as_i64().map(Value::Int64),
            Self::Double | Self::Float => value.as_f64().map(Value::Float64),
            Self::Boolean => value.as_bool().map(Value::Bool),
            Self::Date => value.as_date().map(Value::Date),
            Self::DateTime => value.as_datetime().map(Value::DateTime),
        };
        coerced.ok_or_else(|| {
            Error::validation(format!(
                "field '{}' expects {}, got {:?}",
                field,
                self.as_str(),
                value
            ))
        })
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_nullable() -> bool {
    true
}

/// A single field of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column and document field name
    pub name: String,

    /// Logical type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Part of the table's primary key
    #[serde(default)]
    pub primary_key: bool,

    /// Whether the column accepts NULL
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Length for `string` columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Value used when a record omits the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Index mapping override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_mapping: Option<SearchMapping>,
}

impl FieldDefinition {
    /// Nullable, non-key field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            nullable: true,
            length: None,
            default_value: None,
            search_mapping: None,
        }
    }

    /// Mark as primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the string length
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the index mapping override
    pub fn with_search_mapping(mut self, mapping: SearchMapping) -> Self {
        self.search_mapping = Some(mapping);
        self
    }

    /// Column type with nullability, without the name
    pub fn column_definition(&self) -> String {
        let mut def = self.field_type.sql_type(self.length);
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// `name TYPE[ NOT NULL]`
    pub fn sql_definition(&self) -> String {
        format!("{} {}", self.name, self.column_definition())
    }

    /// Index mapping for this field
    pub fn index_mapping(&self) -> SearchMapping {
        self.search_mapping
            .clone()
            .unwrap_or_else(|| SearchMapping::of(self.field_type.default_index_type()))
    }

    /// The default value coerced to the field's type
    pub fn default(&self) -> Result<Option<Value>> {
        self.default_value
            .as_deref()
            .map(|raw| self.field_type.coerce(&self.name, Value::from(raw)))
            .transpose()
    }
}
