//! # easybase-search
//!
//! Search index adapter for easybase.
//!
//! Every collection has a companion full-text index that mirrors its rows.
//! This crate hides the index server behind the [`SearchIndex`] trait:
//!
//! - **Elasticsearch**: [`client::ElasticsearchClient`] over the REST API
//!   (feature `elasticsearch`, default)
//! - **In-memory**: [`memory::MemoryIndex`] for tests and development, with
//!   fault injection
//! - **Query language**: OData-style filter expressions and sort clauses
//!   compiled to the query DSL ([`query`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use easybase_search::prelude::*;
//!
//! let index = MemoryIndex::new();
//! index.create_index("orders", &IndexMapping::new().with_field("total", FieldMapping::keyword())).await?;
//! index.bulk("orders", &[BulkOperation::index("o-1", serde_json::json!({"total": 42}))]).await?;
//!
//! let request = SearchRequest::new().filter("total ge 10").sort("total desc").page(0, 20);
//! let page = index.search("orders", &request).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod error;
pub mod index;
pub mod mapping;
pub mod memory;
pub mod query;
pub mod request;

#[cfg(feature = "elasticsearch")]
pub mod client;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bulk::{BulkItemResult, BulkOperation, BulkResponse};
    pub use crate::error::{SearchError, SearchResult};
    pub use crate::index::SearchIndex;
    pub use crate::mapping::{FieldMapping, IndexMapping};
    pub use crate::memory::MemoryIndex;
    pub use crate::query::{compile_filter, parse_filter, parse_sort, FilterNode, SortField};
    pub use crate::request::{SearchHit, SearchRequest, SearchResponse};

    #[cfg(feature = "elasticsearch")]
    pub use crate::client::ElasticsearchClient;
}

pub use error::{SearchError, SearchResult};
pub use index::SearchIndex;
