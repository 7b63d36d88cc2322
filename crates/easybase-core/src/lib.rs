//! # easybase-core
//!
//! Collections and the dual-write synchronization engine.
//!
//! Each collection is backed by a relational table (the system of record)
//! and a search index (a derived, eventually consistent copy):
//!
//! - **Schema registry**: [`CollectionService`](collection::CollectionService)
//!   creates and deletes collections on both stores and serves record CRUD
//! - **Sync engine**: [`SyncEngine`](sync::SyncEngine) batches committed
//!   writes into bulk index requests, retries failed items a bounded number
//!   of times and sweeps for drift
//! - **Stores**: the [`RecordStore`](store::RecordStore) trait with SQL and
//!   in-memory implementations
//! - **Configuration**: YAML with `${VAR}` expansion ([`config`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use easybase_core::prelude::*;
//! use easybase_search::memory::MemoryIndex;
//! use std::sync::Arc;
//!
//! let service = CollectionService::build(
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(MemoryIndex::new()),
//!     SyncConfig::default(),
//! );
//! service.initialize().await?;
//! let handle = service.engine().start();
//!
//! service
//!     .create_collection("orders", vec![
//!         FieldDefinition::new("total", FieldType::Double),
//!         FieldDefinition::new("status", FieldType::String),
//!     ])
//!     .await?;
//! service
//!     .create_record("orders", Record::new().with("total", 42.5).with("status", "NEW"))
//!     .await?;
//!
//! handle.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod collection;
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod sync;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};

    pub use crate::collection::{
        CollectionDefinition, CollectionRegistry, CollectionService, FieldDefinition, FieldType,
        Page, Pagination, Record, SearchMapping, ID_FIELD,
    };

    pub use crate::config::{
        DatabaseConfig, EasybaseConfig, LogFormat, LoggingConfig, Password, SearchConfig,
        SyncConfig,
    };

    pub use crate::store::{MemoryRecordStore, RecordStore, SqlRecordStore, Store};

    pub use crate::sync::{
        SyncEngine, SyncHandle, SyncOperation, SyncOutbox, SyncStatsSnapshot,
    };

    pub use easybase_rdbc::Value;
}

pub use error::{Error, Result};
