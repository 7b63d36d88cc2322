//! Bulk operations and their per-item results

use serde::{Deserialize, Serialize};
use serde_json::json;

/// One write in a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkOperation {
    /// Create or replace a document
    Index {
        /// Document id
        id: String,
        /// Document body
        document: serde_json::Value,
    },
    /// Remove a document
    Delete {
        /// Document id
        id: String,
    },
}

impl BulkOperation {
    /// Index a document
    pub fn index(id: impl Into<String>, document: serde_json::Value) -> Self {
        Self::Index {
            id: id.into(),
            document,
        }
    }

    /// Delete a document
    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete { id: id.into() }
    }

    /// Target document id
    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. } | Self::Delete { id } => id,
        }
    }

    /// Whether this is a delete
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    /// Append the NDJSON lines for this operation to `out`
    pub fn write_ndjson(&self, out: &mut String) {
        match self {
            Self::Index { id, document } => {
                out.push_str(&json!({ "index": { "_id": id } }).to_string());
                out.push('\n');
                out.push_str(&document.to_string());
                out.push('\n');
            }
            Self::Delete { id } => {
                out.push_str(&json!({ "delete": { "_id": id } }).to_string());
                out.push('\n');
            }
        }
    }
}

/// Render a bulk request body
pub fn to_ndjson(operations: &[BulkOperation]) -> String {
    let mut body = String::with_capacity(operations.len() * 128);
    for op in operations {
        op.write_ndjson(&mut body);
    }
    body
}

/// Outcome of a single bulk item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    /// Document id
    pub id: String,
    /// Whether the item was a delete
    pub delete: bool,
    /// HTTP-style status for the item
    pub status: u16,
    /// Result keyword (`created`, `updated`, `deleted`, `not_found`)
    #[serde(default)]
    pub result: Option<String>,
    /// Error reason, when the item failed
    #[serde(default)]
    pub error: Option<String>,
}

impl BulkItemResult {
    /// Successful item
    pub fn ok(id: impl Into<String>, delete: bool, result: &str) -> Self {
        Self {
            id: id.into(),
            delete,
            status: if result == "created" { 201 } else { 200 },
            result: Some(result.to_string()),
            error: None,
        }
    }

    /// Failed item
    pub fn failed(id: impl Into<String>, delete: bool, status: u16, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delete,
            status,
            result: None,
            error: Some(reason.into()),
        }
    }

    /// Whether the item succeeded
    ///
    /// Deleting a document that is already gone counts as success.
    pub fn is_success(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        (200..300).contains(&self.status)
            || (self.delete && (self.status == 404 || self.result.as_deref() == Some("not_found")))
    }
}

/// Response to a bulk request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Server-side processing time
    pub took_ms: u64,
    /// Per-item outcomes in request order
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    /// Whether any item failed
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| !i.is_success())
    }

    /// Ids of failed items
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed().map(|i| i.id.as_str()).collect()
    }

    /// Failed items
    pub fn failed(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|i| !i.is_success())
    }

    /// Number of successful items
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    /// Parse an Elasticsearch `_bulk` response body
    ///
    /// ```json
    /// {"took":3,"errors":false,"items":[{"index":{"_id":"1","status":201,"result":"created"}}]}
    /// ```
    pub fn from_elasticsearch(body: &serde_json::Value) -> Self {
        let took_ms = body.get("took").and_then(|v| v.as_u64()).unwrap_or(0);
        let items = body
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(parse_item).collect())
            .unwrap_or_default();
        Self { took_ms, items }
    }
}

fn parse_item(item: &serde_json::Value) -> Option<BulkItemResult> {
    let (action, detail) = item.as_object()?.iter().next()?;
    let error = detail.get("error").map(|e| {
        let kind = e.get("type").and_then(|v| v.as_str()).unwrap_or("error");
        match e.get("reason").and_then(|v| v.as_str()) {
            Some(reason) => format!("{kind}: {reason}"),
            None => kind.to_string(),
        }
    });
    Some(BulkItemResult {
        id: detail
            .get("_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        delete: action == "delete",
        status: detail
            .get("status")
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(500),
        result: detail
            .get("result")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        error,
    })
}
