//! Search index abstraction

use async_trait::async_trait;

use crate::bulk::{BulkOperation, BulkResponse};
use crate::error::SearchResult;
use crate::mapping::IndexMapping;
use crate::request::{SearchRequest, SearchResponse};

/// A full-text search index server
///
/// Implementations must be safe to share across tasks. Writes are not
/// transactional: a bulk call may partially succeed, and callers inspect
/// [`BulkResponse::items`] to find out which documents need retrying.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Create an index with the given mapping
    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> SearchResult<()>;

    /// Delete an index; deleting a missing index succeeds
    async fn delete_index(&self, index: &str) -> SearchResult<()>;

    /// Whether the index exists
    async fn index_exists(&self, index: &str) -> SearchResult<bool>;

    /// Apply index/delete operations in one request
    async fn bulk(&self, index: &str, operations: &[BulkOperation]) -> SearchResult<BulkResponse>;

    /// Number of documents in the index
    async fn count(&self, index: &str) -> SearchResult<u64>;

    /// Run a search
    async fn search(&self, index: &str, request: &SearchRequest) -> SearchResult<SearchResponse>;

    /// Every document id in the index
    async fn all_ids(&self, index: &str) -> SearchResult<Vec<String>>;
}
