//! Error types for easybase-core

use easybase_search::SearchError;

/// Result type for easybase-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the collection service and sync engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Duplicate collection name or record id
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Unknown collection or record
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed validation (identifier, missing field, bad value)
    #[error("validation failed: {0}")]
    Validation(String),

    /// Relational store failure
    #[error("storage failure: {0}")]
    Storage(#[from] easybase_rdbc::Error),

    /// Search index failure
    #[error("index failure: {0}")]
    Index(#[from] SearchError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization / deserialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Service used before `initialize()` completed
    #[error("service not initialized")]
    NotInitialized,
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether retrying the operation may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retriable(),
            Self::Index(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the search index could not be reached
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::Index(e) if e.is_retryable())
    }

    /// Whether the relational store rejected a duplicate key
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_unique_violation())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_delegates_to_adapter() {
        assert!(Error::from(easybase_rdbc::Error::unavailable("refused")).is_retriable());
        assert!(!Error::from(easybase_rdbc::Error::Schema("bad ddl".into())).is_retriable());
        assert!(Error::from(SearchError::Unavailable("503".into())).is_retriable());
        assert!(!Error::validation("missing field").is_retriable());
    }

    #[test]
    fn test_index_unavailable() {
        assert!(Error::from(SearchError::Timeout("30s".into())).is_index_unavailable());
        assert!(!Error::from(SearchError::IndexNotFound("orders".into())).is_index_unavailable());
    }

    #[test]
    fn test_duplicate_key() {
        let err = Error::from(easybase_rdbc::Error::constraint("orders_pkey", "duplicate key"));
        assert!(err.is_duplicate_key());
        assert!(!Error::not_found("orders").is_duplicate_key());
    }
}
