//! Collections: shapes, records and the schema registry
//!
//! A collection is one relational table plus one search index. The
//! [`CollectionService`] mediates every schema change so both sides agree
//! on which fields exist, and routes record writes through the sync
//! engine.

mod definition;
mod field;
mod page;
mod record;
mod registry;
mod service;

pub use definition::{CollectionDefinition, AUDIT_COLUMNS, CREATED_DATE, ID_FIELD, MODIFIED_DATE};
pub use field::{FieldDefinition, FieldType, SearchMapping, DEFAULT_STRING_LENGTH};
pub use page::{Page, Pagination, DEFAULT_PAGE_SIZE};
pub use record::Record;
pub use registry::CollectionRegistry;
pub use service::CollectionService;
