//! Database access error types.

use thiserror::Error;

/// Errors raised by a [`Database`](super::Database) backend or one of its
/// transactions.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Driver level failure from PostgreSQL
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The table is not known to the backend
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A table or savepoint name is not a plain SQL identifier
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A row violates a referential or uniqueness constraint
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The transaction exceeded its time budget
    #[error("transaction timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Savepoint was never created in this transaction
    #[error("unknown savepoint: {0}")]
    UnknownSavepoint(String),

    /// Row payload could not be converted to or from JSON
    #[error("row serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure injected by a test backend
    #[error("injected failure: {0}")]
    Injected(String),

    /// Unexpected backend failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl DatabaseError {
    /// Create an `Internal` error with a formatted message
    #[must_use]
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

/// Result type for database operations.
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;
