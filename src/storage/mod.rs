//! entitydb Storage Layer
//!
//! This module provides the persistence primitives every store builds on:
//!
//! - **types**: Entity ids, property values, log records
//! - **log**: Append-only record log (batched writer, corruption-tolerant reader)
//! - **compaction**: Rewrites a log from in-memory truth when it is mostly deletes
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   mutation → in-memory index (visible now) → LogWriter queue → debounce → append
//!
//! Startup:
//!   read_log → replay into index → CompactionPolicy → (compact) → ready
//! ```

pub mod compaction;
pub mod error;
pub mod log;
pub mod types;

pub use compaction::{backup_path, compact, CompactionPolicy};
pub use error::{StoreError, StoreResult};
pub use log::{encode_batch, encode_record, read_log, LogWriter, ReplayStats, WriterOptions};
pub use types::{parse_id, EntityId, IdSet, LogOp, LogRecord, PropValue, ReplayCounts, EMPTY_IDS};

/// Settings every log-backed store is opened with
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LogSettings {
    /// Writer behaviour
    pub writer: WriterOptions,
    /// Compaction trigger
    pub compaction: CompactionPolicy,
}
