//! Error types for easybase-search

/// Result type alias for search index operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors raised by the search index adapter
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Client configuration error (bad URL, invalid credentials format)
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication or authorisation failure
    #[error("authentication error: {0}")]
    Auth(String),

    /// Target index does not exist
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Index already exists on create
    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    /// Request rejected by the index server
    #[error("bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    /// Server-side failure (5xx, cluster not ready)
    #[error("index unavailable: {0}")]
    Unavailable(String),

    /// Request timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Network / transport error
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed filter or sort expression
    #[error("query error at position {position}: {message}")]
    Query { message: String, position: usize },

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal / unexpected error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// Create a query error at `position`
    pub fn query(message: impl Into<String>, position: usize) -> Self {
        Self::Query {
            message: message.into(),
            position,
        }
    }

    /// Whether this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Unavailable(_) | SearchError::Timeout(_) | SearchError::Connection(_)
        )
    }

    /// Whether the index was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::IndexNotFound(_))
    }
}

#[cfg(feature = "elasticsearch")]
impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout("request timed out".to_string())
        } else if err.is_connect() {
            SearchError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => SearchError::Auth(err.to_string()),
                404 => SearchError::IndexNotFound(err.to_string()),
                500..=599 => SearchError::Unavailable(err.to_string()),
                code => SearchError::BadRequest {
                    status: code,
                    message: err.to_string(),
                },
            }
        } else if err.is_decode() {
            SearchError::Serialization(err.to_string())
        } else {
            SearchError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SearchError::Unavailable("503".into()).is_retryable());
        assert!(SearchError::Timeout("30s".into()).is_retryable());
        assert!(SearchError::Connection("refused".into()).is_retryable());

        assert!(!SearchError::IndexNotFound("orders".into()).is_retryable());
        assert!(!SearchError::BadRequest {
            status: 400,
            message: "mapper_parsing_exception".into()
        }
        .is_retryable());
        assert!(!SearchError::query("unexpected token", 3).is_retryable());
    }

    #[test]
    fn test_query_error_display() {
        let err = SearchError::query("expected ')'", 12);
        assert_eq!(
            err.to_string(),
            "query error at position 12: expected ')'"
        );
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: SearchError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, SearchError::Serialization(_)));
    }
}
