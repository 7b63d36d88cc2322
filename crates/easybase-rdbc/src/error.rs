//! Error types for easybase-rdbc
//!
//! Every failure the relational store reports falls in one
//! [`ErrorCategory`]. The registry and the sync engine only care about two
//! questions: can the call be retried, and did it hit a duplicate key.

use thiserror::Error;

/// Result type for easybase-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of store failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Server unreachable, connection lost or pool exhausted
    Unavailable,
    /// Statement or acquisition ran past its deadline
    Timeout,
    /// Unique or primary key violation
    Constraint,
    /// Missing table or rejected DDL
    Schema,
    /// Caller input the store cannot accept (identifiers, value types)
    InvalidInput,
    /// Any other statement or transaction failure
    Statement,
}

impl ErrorCategory {
    /// Whether a later attempt may succeed unchanged
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }

    /// Short label used in logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Constraint => "constraint",
            Self::Schema => "schema",
            Self::InvalidInput => "invalid_input",
            Self::Statement => "statement",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relational store failure
#[derive(Error, Debug)]
pub enum Error {
    /// The database could not be reached or dropped the connection
    #[error("database unavailable: {message}")]
    Unavailable {
        /// What failed
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxedSource>,
    },

    /// No pooled connection became free in time, or the pool is closed
    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    /// Statement deadline exceeded
    #[error("statement timed out: {0}")]
    Timeout(String),

    /// Duplicate key
    #[error("duplicate key violates '{constraint}': {message}")]
    Constraint {
        /// Constraint name reported by the server
        constraint: String,
        /// Server message
        message: String,
    },

    /// The statement referenced a table that does not exist
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// DDL rejected by the server
    #[error("schema error: {0}")]
    Schema(String),

    /// Table or column name rejected before reaching the server
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A column value did not have the expected type
    #[error("type conversion failed: {0}")]
    TypeConversion(String),

    /// Statement failed for another reason
    #[error("statement failed: {message}")]
    Statement {
        /// Server or driver message
        message: String,
        /// Statement text, when known
        sql: Option<String>,
        /// Driver error
        #[source]
        source: Option<BoxedSource>,
    },

    /// BEGIN, COMMIT or ROLLBACK failed
    #[error("transaction failed: {message}")]
    Transaction {
        /// Server or driver message
        message: String,
        /// Driver error
        #[source]
        source: Option<BoxedSource>,
    },
}

impl Error {
    /// Classification used for retry decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } | Self::PoolExhausted(_) => ErrorCategory::Unavailable,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Constraint { .. } => ErrorCategory::Constraint,
            Self::TableNotFound(_) | Self::Schema(_) => ErrorCategory::Schema,
            Self::InvalidIdentifier(_) | Self::TypeConversion(_) => ErrorCategory::InvalidInput,
            Self::Statement { .. } | Self::Transaction { .. } => ErrorCategory::Statement,
        }
    }

    /// Whether a later attempt may succeed unchanged
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether a unique or primary key constraint rejected the write
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Constraint { .. })
    }

    /// Statement text attached to the error
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Statement { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Server unreachable
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Server unreachable, keeping the driver error
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Statement failure without driver context
    pub fn statement(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Transaction boundary failure, keeping the driver error
    pub fn transaction(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Duplicate key
    pub fn constraint(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint: constraint.into(),
            message: message.into(),
        }
    }
}
