//! Storage error types
//!
//! Defines all errors that can occur in the record log, the compactor and the
//! secondary indices built on top of them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A log record could not be decoded
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// The caller passed a malformed argument (empty tag, bad id, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Compaction could not move the old log out of the way
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Appending to a log kept failing after the configured number of attempts
    #[error("Write to {path:?} failed after {attempts} attempts: {error}")]
    WriteFailed {
        path: PathBuf,
        attempts: u32,
        error: String,
    },
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StoreError::Corruption(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
