//! Log compaction
//!
//! Replaying a log that is mostly deletes is wasted work. After replay a store
//! asks its `CompactionPolicy` whether the log should be rewritten; if so the
//! old file is moved aside to a numbered backup and a fresh log is written
//! from the in-memory state, one insert record per live entry.

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::log::{LogWriter, WriterOptions};
use crate::storage::types::{LogRecord, ReplayCounts};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// When to rewrite a log after replay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionPolicy {
    /// Minimum deletes / inserts ratio (exclusive)
    pub min_ratio: f64,
    /// Minimum absolute delete count (exclusive)
    pub min_deletes: u64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            min_ratio: 0.2,
            min_deletes: 1000,
        }
    }
}

impl CompactionPolicy {
    /// Never compact
    pub fn disabled() -> Self {
        Self {
            min_ratio: f64::INFINITY,
            min_deletes: u64::MAX,
        }
    }

    /// Whether a log with these counts should be compacted
    pub fn should_compact(&self, counts: ReplayCounts) -> bool {
        if counts.deletes <= self.min_deletes {
            return false;
        }
        let ratio = if counts.inserts == 0 {
            f64::INFINITY
        } else {
            counts.deletes as f64 / counts.inserts as f64
        };
        ratio > self.min_ratio
    }
}

/// Pick the first free backup name `<path>_<n>`
pub fn backup_path(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_string_lossy().to_string();
    let mut generation = 1u32;
    loop {
        let candidate = PathBuf::from(format!("{}_{}", base, generation));
        if !candidate.exists() {
            return candidate;
        }
        generation += 1;
    }
}

/// Move the log at `path` aside and write `records` as its new content.
///
/// Returns the backup path. Fails without writing anything if the original
/// file is still in place after the rename.
pub async fn compact<P>(path: &Path, records: Vec<LogRecord<P>>) -> StoreResult<PathBuf>
where
    P: Serialize + Send + Sync + 'static,
{
    let backup = backup_path(path);
    tokio::fs::rename(path, &backup).await.map_err(|e| {
        StoreError::Compaction(format!("failed to move {:?} to {:?}: {}", path, backup, e))
    })?;

    if tokio::fs::try_exists(path).await? {
        return Err(StoreError::Compaction(format!(
            "{:?} still exists after moving it to {:?}",
            path, backup
        )));
    }

    let writer = LogWriter::new(path, WriterOptions::unbatched());
    writer.append_all(&records).await?;

    tracing::info!(
        "Compacted {:?}: wrote {} records, previous log kept at {:?}",
        path,
        records.len(),
        backup
    );
    Ok(backup)
}
