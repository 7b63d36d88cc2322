//! Sort expressions: `"name asc, total desc"`

use serde_json::{json, Value};

use crate::error::{SearchError, SearchResult};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending (default)
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Field name
    pub field: String,
    /// Direction
    pub order: SortOrder,
}

impl SortField {
    /// `{"field":{"order":"asc"}}`
    pub fn to_json(&self) -> Value {
        json!({ &self.field: { "order": self.order.as_str() } })
    }
}

/// Parse a comma-separated sort expression
///
/// Each clause is `field [asc|desc]`; blank input means no sort.
pub fn parse_sort(input: &str) -> SearchResult<Vec<SortField>> {
    let mut fields = Vec::new();
    let mut offset = 0;

    for clause in input.split(',') {
        let position = offset + (clause.len() - clause.trim_start().len());
        offset += clause.len() + 1;

        let mut parts = clause.split_whitespace();
        let Some(field) = parts.next() else {
            if input.trim().is_empty() {
                break;
            }
            return Err(SearchError::query("empty sort clause", position));
        };
        if !is_field_name(field) {
            return Err(SearchError::query(
                format!("invalid sort field '{field}'"),
                position,
            ));
        }
        let order = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            Some(other) => {
                return Err(SearchError::query(
                    format!("invalid sort direction '{other}'"),
                    position + field.len(),
                ))
            }
        };
        if parts.next().is_some() {
            return Err(SearchError::query("unexpected text in sort clause", position));
        }
        fields.push(SortField {
            field: field.to_string(),
            order,
        });
    }

    Ok(fields)
}

/// Render sort keys as the DSL `sort` array
pub fn sort_to_json(fields: &[SortField]) -> Value {
    Value::Array(fields.iter().map(SortField::to_json).collect())
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort() {
        let fields = parse_sort("name asc, total DESC, placed").unwrap();
        assert_eq!(
            sort_to_json(&fields),
            json!([
                { "name": { "order": "asc" } },
                { "total": { "order": "desc" } },
                { "placed": { "order": "asc" } }
            ])
        );
    }

    #[test]
    fn test_blank_sort() {
        assert!(parse_sort("").unwrap().is_empty());
        assert!(parse_sort("  ").unwrap().is_empty());
    }

    #[test]
    fn test_sort_errors() {
        assert!(matches!(
            parse_sort("name sideways"),
            Err(SearchError::Query { position: 4, .. })
        ));
        assert!(matches!(
            parse_sort("name,,total"),
            Err(SearchError::Query { position: 5, .. })
        ));
        assert!(parse_sort("1name").is_err());
    }
}
