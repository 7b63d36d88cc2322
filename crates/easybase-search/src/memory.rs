//! In-process search index
//!
//! Used by tests and by the daemon's `--memory` mode. Filters, free text,
//! sorting and paging are evaluated directly against the stored JSON
//! documents. Faults can be injected at transport level (whole calls fail)
//! or at item level (specific document ids fail inside a bulk).

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

use crate::bulk::{BulkItemResult, BulkOperation, BulkResponse};
use crate::error::{SearchError, SearchResult};
use crate::mapping::IndexMapping;
use crate::query::{parse_filter, parse_sort, ComparisonOp, FilterNode, Literal, SortField, SortOrder};
use crate::request::{SearchHit, SearchRequest, SearchResponse};
use crate::index::SearchIndex;

#[derive(Debug, Default)]
struct StoredIndex {
    mapping: IndexMapping,
    documents: BTreeMap<String, Value>,
}

/// In-memory [`SearchIndex`]
#[derive(Debug, Default)]
pub struct MemoryIndex {
    indices: DashMap<String, StoredIndex>,
    unavailable: AtomicBool,
    fail_bulk: AtomicUsize,
    fail_create: AtomicUsize,
    failing_ids: RwLock<HashSet<String>>,
    bulk_calls: AtomicU64,
}

impl MemoryIndex {
    /// Empty index server
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`SearchError::Unavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` bulk calls at transport level
    pub fn fail_next_bulk(&self, n: usize) {
        self.fail_bulk.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` create-index calls
    pub fn fail_next_create(&self, n: usize) {
        self.fail_create.store(n, Ordering::SeqCst);
    }

    /// Reject bulk items for these document ids until cleared
    pub fn fail_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_ids
            .write()
            .extend(ids.into_iter().map(Into::into));
    }

    /// Stop rejecting bulk items
    pub fn clear_failing_ids(&self) {
        self.failing_ids.write().clear();
    }

    /// Number of bulk calls received, including failed ones
    pub fn bulk_calls(&self) -> u64 {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Stored document
    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.indices
            .get(index)
            .and_then(|idx| idx.documents.get(id).cloned())
    }

    /// Mapping the index was created with
    pub fn mapping(&self, index: &str) -> Option<IndexMapping> {
        self.indices.get(index).map(|idx| idx.mapping.clone())
    }

    /// Names of existing indices
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Write a document directly, bypassing bulk and fault injection
    pub fn put_document(&self, index: &str, id: &str, document: Value) {
        self.indices
            .entry(index.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), document);
    }

    /// Remove a document directly
    pub fn remove_document(&self, index: &str, id: &str) -> bool {
        self.indices
            .get_mut(index)
            .is_some_and(|mut idx| idx.documents.remove(id).is_some())
    }

    fn check_available(&self) -> SearchResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SearchError::Unavailable("index server is down".into()));
        }
        Ok(())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> SearchResult<()> {
        self.check_available()?;
        if Self::take_fault(&self.fail_create) {
            return Err(SearchError::Unavailable(format!(
                "injected failure creating {index}"
            )));
        }
        if self.indices.contains_key(index) {
            return Err(SearchError::IndexAlreadyExists(index.to_string()));
        }
        self.indices.insert(
            index.to_string(),
            StoredIndex {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        debug!(index = %index, fields = mapping.len(), "Created in-memory index");
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> SearchResult<()> {
        self.check_available()?;
        self.indices.remove(index);
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        self.check_available()?;
        Ok(self.indices.contains_key(index))
    }

    async fn bulk(&self, index: &str, operations: &[BulkOperation]) -> SearchResult<BulkResponse> {
        let started = Instant::now();
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if Self::take_fault(&self.fail_bulk) {
            return Err(SearchError::Unavailable("injected bulk failure".into()));
        }

        let failing = self.failing_ids.read().clone();
        // Elasticsearch auto-creates missing indices on write
        let mut stored = self.indices.entry(index.to_string()).or_default();
        let items = operations
            .iter()
            .map(|op| {
                let id = op.id();
                if failing.contains(id) {
                    return BulkItemResult::failed(
                        id,
                        op.is_delete(),
                        429,
                        "es_rejected_execution_exception: injected failure",
                    );
                }
                match op {
                    BulkOperation::Index { id, document } => {
                        let created = stored.documents.insert(id.clone(), document.clone()).is_none();
                        BulkItemResult::ok(id, false, if created { "created" } else { "updated" })
                    }
                    BulkOperation::Delete { id } => {
                        if stored.documents.remove(id).is_some() {
                            BulkItemResult::ok(id, true, "deleted")
                        } else {
                            BulkItemResult {
                                id: id.clone(),
                                delete: true,
                                status: 404,
                                result: Some("not_found".into()),
                                error: None,
                            }
                        }
                    }
                }
            })
            .collect();

        Ok(BulkResponse {
            took_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            items,
        })
    }

    async fn count(&self, index: &str) -> SearchResult<u64> {
        self.check_available()?;
        self.indices
            .get(index)
            .map(|idx| idx.documents.len() as u64)
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchResponse> {
        self.check_available()?;
        let filter = match &request.filter {
            Some(f) => parse_filter(f)?,
            None => None,
        };
        let sort = match &request.sort {
            Some(s) => parse_sort(s)?,
            None => Vec::new(),
        };
        let text = request.text.as_deref().map(str::to_lowercase);

        let stored = self
            .indices
            .get(index)
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))?;

        let mut matches: Vec<(&String, &Value)> = stored
            .documents
            .iter()
            .filter(|(_, doc)| filter.as_ref().map_or(true, |f| matches_filter(f, doc)))
            .filter(|(_, doc)| text.as_deref().map_or(true, |t| matches_text(t, doc)))
            .collect();
        if !sort.is_empty() {
            matches.sort_by(|a, b| compare_docs(&sort, a.1, b.1));
        }

        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(usize::try_from(request.from).unwrap_or(usize::MAX))
            .take(usize::try_from(request.size).unwrap_or(usize::MAX))
            .map(|(id, doc)| SearchHit {
                id: id.clone(),
                score: Some(1.0),
                source: doc.as_object().cloned().unwrap_or_default(),
            })
            .collect();

        Ok(SearchResponse { total, hits })
    }

    async fn all_ids(&self, index: &str) -> SearchResult<Vec<String>> {
        self.check_available()?;
        self.indices
            .get(index)
            .map(|idx| idx.documents.keys().cloned().collect())
            .ok_or_else(|| SearchError::IndexNotFound(index.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Evaluation of filters against stored documents
// ---------------------------------------------------------------------------

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

fn matches_filter(node: &FilterNode, doc: &Value) -> bool {
    match node {
        FilterNode::And(nodes) => nodes.iter().all(|n| matches_filter(n, doc)),
        FilterNode::Or(nodes) => nodes.iter().any(|n| matches_filter(n, doc)),
        FilterNode::Not(inner) => !matches_filter(inner, doc),
        FilterNode::Contains { field, value } => lookup(doc, field)
            .and_then(Value::as_str)
            .is_some_and(|s| s.contains(value.as_str())),
        FilterNode::Comparison { field, op, value } => {
            let actual = lookup(doc, field);
            match (op, value) {
                (ComparisonOp::Eq, Literal::Null) => actual.is_none(),
                (ComparisonOp::Ne, Literal::Null) => actual.is_some(),
                (ComparisonOp::Eq, lit) => actual.is_some_and(|a| compare(a, lit) == Some(CmpOrdering::Equal)),
                (ComparisonOp::Ne, lit) => !actual.is_some_and(|a| compare(a, lit) == Some(CmpOrdering::Equal)),
                (ComparisonOp::StartsWith, lit) => actual
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.starts_with(&lit.as_text())),
                (range, lit) => actual.and_then(|a| compare(a, lit)).is_some_and(|ord| match range {
                    ComparisonOp::Gt => ord == CmpOrdering::Greater,
                    ComparisonOp::Ge => ord != CmpOrdering::Less,
                    ComparisonOp::Lt => ord == CmpOrdering::Less,
                    _ => ord != CmpOrdering::Greater,
                }),
            }
        }
    }
}

fn compare(actual: &Value, literal: &Literal) -> Option<CmpOrdering> {
    match (actual, literal) {
        (Value::Bool(a), Literal::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Literal::Integer(b)) => a.as_f64()?.partial_cmp(&(*b as f64)),
        (Value::Number(a), Literal::Decimal(b)) => a.as_f64()?.partial_cmp(b),
        (Value::String(a), Literal::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::String(a), lit) => Some(a.as_str().cmp(lit.as_text().as_str())),
        _ => None,
    }
}

fn matches_text(text: &str, doc: &Value) -> bool {
    match doc {
        Value::Object(map) => map.values().any(|v| matches_text(text, v)),
        Value::Array(items) => items.iter().any(|v| matches_text(text, v)),
        Value::String(s) => s.to_lowercase().contains(text),
        Value::Number(n) => n.to_string() == text,
        Value::Bool(b) => b.to_string() == text,
        Value::Null => false,
    }
}

fn compare_docs(sort: &[SortField], a: &Value, b: &Value) -> CmpOrdering {
    for key in sort {
        let ord = match (lookup(a, &key.field), lookup(b, &key.field)) {
            (None, None) => CmpOrdering::Equal,
            // missing values sort last in either direction
            (None, Some(_)) => return CmpOrdering::Greater,
            (Some(_), None) => return CmpOrdering::Less,
            (Some(x), Some(y)) => compare_values(x, y),
        };
        let ord = match key.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

fn compare_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => CmpOrdering::Equal,
    }
}
