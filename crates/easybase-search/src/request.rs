//! Search requests and responses

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SearchResult;
use crate::query::{compile_filter, parse_sort, sort_to_json};

/// Default page size when none is given
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Free text + filter + sort + paging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query matched against every field
    pub text: Option<String>,
    /// Filter expression
    pub filter: Option<String>,
    /// Sort expression
    pub sort: Option<String>,
    /// Offset of the first hit
    pub from: u64,
    /// Maximum hits returned
    pub size: u64,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            text: None,
            filter: None,
            sort: None,
            from: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SearchRequest {
    /// Match-everything request for the first page
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the free-text query (blank text is ignored)
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Set the filter expression
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into()).filter(|f: &String| !f.trim().is_empty());
        self
    }

    /// Set the sort expression
    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into()).filter(|s: &String| !s.trim().is_empty());
        self
    }

    /// Select page `page` (zero-based) of `size` hits
    pub fn page(mut self, page: u64, size: u64) -> Self {
        self.from = page.saturating_mul(size);
        self.size = size;
        self
    }

    /// Build the `_search` request body
    ///
    /// An empty `bool` query matches every document.
    pub fn to_body(&self) -> SearchResult<Value> {
        let mut bool_query = Map::new();

        if let Some(text) = &self.text {
            bool_query.insert(
                "must".into(),
                json!([{
                    "multi_match": {
                        "query": text,
                        "type": "best_fields",
                        "fuzziness": "AUTO",
                        "fields": ["*"]
                    }
                }]),
            );
        }

        if let Some(filter) = self.filter.as_deref().map(compile_filter).transpose()?.flatten() {
            bool_query.insert("filter".into(), json!([filter]));
        }

        let mut body = json!({
            "query": { "bool": bool_query },
            "from": self.from,
            "size": self.size,
            "track_total_hits": true
        });

        if let Some(sort) = &self.sort {
            let fields = parse_sort(sort)?;
            if !fields.is_empty() {
                body["sort"] = sort_to_json(&fields);
            }
        }

        Ok(body)
    }
}

/// A single search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document id
    pub id: String,
    /// Relevance score
    pub score: Option<f64>,
    /// Stored document
    pub source: Map<String, Value>,
}

/// Search result page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Total matching documents
    pub total: u64,
    /// Hits in the requested window
    pub hits: Vec<SearchHit>,
}

impl SearchResponse {
    /// Parse an Elasticsearch `_search` response body
    pub fn from_elasticsearch(body: &Value) -> Self {
        let hits = &body["hits"];
        let total = match &hits["total"] {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            other => other["value"].as_u64().unwrap_or(0),
        };
        let hits = hits["hits"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .map(|hit| SearchHit {
                        id: hit["_id"].as_str().unwrap_or_default().to_string(),
                        score: hit["_score"].as_f64(),
                        source: hit["_source"].as_object().cloned().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { total, hits }
    }
}
