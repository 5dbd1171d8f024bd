//! Sequences - monotonic counters per context
//!
//! Every `next` appends the new value, so the log grows by one record per
//! number handed out. Replay keeps the last value per key; when the log holds
//! more than `RECORDS_PER_KEY` records per key it is rewritten to one record
//! per key.

use crate::storage::{compact, read_log, LogRecord, LogSettings, LogWriter, StoreResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Replayed records per key above which the log is compacted
pub const RECORDS_PER_KEY: u64 = 1000;

/// Payload of a sequence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeqRecord {
    pub key: String,
    pub value: u64,
}

/// Per-context monotonic counters
pub struct Sequences {
    counters: Mutex<BTreeMap<String, u64>>,
    writer: Arc<LogWriter<SeqRecord>>,
}

impl Sequences {
    pub async fn open(path: impl Into<PathBuf>, settings: LogSettings) -> StoreResult<Self> {
        let path = path.into();
        let mut counters = BTreeMap::new();

        let stats = read_log::<SeqRecord, _>(&path, |record| {
            counters.insert(record.payload.key, record.payload.value);
        })
        .await?;

        tracing::info!(
            "Loaded sequences from {:?}: {} records, {} keys",
            path,
            stats.records,
            counters.len()
        );

        if !counters.is_empty() && stats.records / counters.len() as u64 > RECORDS_PER_KEY {
            tracing::info!(
                "Number sequences has more than {} numbers per key. Optimizing the file.",
                RECORDS_PER_KEY
            );
            let records = counters
                .iter()
                .map(|(key, &value)| {
                    LogRecord::insert(SeqRecord {
                        key: key.clone(),
                        value,
                    })
                })
                .collect();
            compact(&path, records).await?;
        }

        Ok(Self {
            counters: Mutex::new(counters),
            writer: LogWriter::new(&path, settings.writer),
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Next number for `context` (None = the default context), starting at 1
    pub fn next(&self, context: Option<&str>) -> u64 {
        let key = context_key(context);
        let value = {
            let mut counters = self.counters.lock();
            let counter = counters.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.writer.write(LogRecord::insert(SeqRecord { key, value }));
        value
    }

    /// Last number handed out for `context`
    pub fn last(&self, context: Option<&str>) -> Option<u64> {
        self.counters.lock().get(&context_key(context)).copied()
    }

    /// Raise the counter of `context` to `value`. Lower values are ignored.
    pub fn set(&self, context: Option<&str>, value: u64) -> bool {
        let key = context_key(context);
        {
            let mut counters = self.counters.lock();
            let current = counters.entry(key.clone()).or_insert(0);
            if *current >= value {
                return false;
            }
            *current = value;
        }
        self.writer.write(LogRecord::insert(SeqRecord { key, value }));
        true
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }
}

fn context_key(context: Option<&str>) -> String {
    context.unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_counters_are_per_context() {
        let dir = tempdir().unwrap();
        let seq = Sequences::open(dir.path().join("sequences.data"), LogSettings::default())
            .await
            .unwrap();

        assert_eq!(seq.last(None), None);
        assert_eq!(seq.next(None), 1);
        assert_eq!(seq.next(None), 2);
        assert_eq!(seq.next(Some("invoice")), 1);
        assert_eq!(seq.last(None), Some(2));
        assert_eq!(seq.last(Some("invoice")), Some(1));
    }

    #[tokio::test]
    async fn test_set_only_raises() {
        let dir = tempdir().unwrap();
        let seq = Sequences::open(dir.path().join("sequences.data"), LogSettings::default())
            .await
            .unwrap();

        assert!(seq.set(Some("a"), 10));
        assert!(!seq.set(Some("a"), 5));
        assert_eq!(seq.next(Some("a")), 11);
    }

    #[tokio::test]
    async fn test_reload_and_compact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sequences.data");
        {
            let seq = Sequences::open(&path, LogSettings::default()).await.unwrap();
            for _ in 0..1005 {
                seq.next(Some("x"));
            }
            seq.flush().await.unwrap();
        }

        let seq = Sequences::open(&path, LogSettings::default()).await.unwrap();
        assert_eq!(seq.last(Some("x")), Some(1005));
        assert!(dir.path().join("sequences.data_1").exists());

        let seq = Sequences::open(&path, LogSettings::default()).await.unwrap();
        assert_eq!(seq.next(Some("x")), 1006);
    }
}
