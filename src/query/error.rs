//! Query error types
//!
//! Defines the error conditions of query parsing and evaluation.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A token parsed but its value is unusable (e.g. `id:abc`)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Store(#[from] crate::storage::StoreError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
