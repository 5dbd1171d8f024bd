//! Append-only record log
//!
//! Every store persists its mutations as a sequence of self-describing
//! MessagePack documents. Records are appended in program order and replayed
//! at startup to rebuild the in-memory indices.
//!
//! Format per record:
//! - length: u32 (4 bytes, big-endian)
//! - data: [u8; length] (MessagePack map of `LogRecord<P>`)
//!
//! # Writing
//!
//! `LogWriter::write` only queues the record. A flush is scheduled after the
//! debounce window (or right away when batching is disabled) and drains the
//! whole queue into a single append. At most one flush touches the file at a
//! time; a caller that arrives while a flush is running waits on the flush
//! lock and then finds the queue already drained.
//!
//! # Reading
//!
//! `read_log` walks the file from offset 0. The first record that fails to
//! decode ends the replay: everything before it is applied, everything after
//! it is ignored.

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::types::LogRecord;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;

/// Size of the big-endian length prefix in front of every record
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Flush behaviour of a `LogWriter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Collect writes for `debounce` before flushing (false = flush per write)
    pub batching: bool,
    /// Debounce window for batched writes
    pub debounce: Duration,
    /// Pause between failed append attempts
    pub retry_backoff: Duration,
    /// Give up after this many failed attempts (None = retry forever)
    pub max_retries: Option<u32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            batching: true,
            debounce: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(100),
            max_retries: None,
        }
    }
}

impl WriterOptions {
    /// Options that flush every write immediately
    pub fn unbatched() -> Self {
        Self {
            batching: false,
            ..Default::default()
        }
    }
}

/// Batched, single-flight appender for one log file
pub struct LogWriter<P> {
    /// Target file
    path: PathBuf,
    /// Records waiting for the next flush
    queue: Mutex<Vec<LogRecord<P>>>,
    /// Held for the whole duration of a flush
    flush_lock: tokio::sync::Mutex<()>,
    /// Whether a debounce timer is already pending
    timer_armed: AtomicBool,
    /// Flush behaviour
    options: WriterOptions,
    /// Runtime used to schedule background flushes
    runtime: Option<Handle>,
}

impl<P> LogWriter<P>
where
    P: Serialize + Send + Sync + 'static,
{
    /// Create a writer for `path`. The file is created on first flush.
    ///
    /// When called outside a Tokio runtime no background flushes are
    /// scheduled and records stay queued until `flush` is awaited.
    pub fn new(path: impl Into<PathBuf>, options: WriterOptions) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            queue: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            timer_armed: AtomicBool::new(false),
            options,
            runtime: Handle::try_current().ok(),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records not yet handed to a flush
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queue a record and schedule a flush
    pub fn write(self: &Arc<Self>, record: LogRecord<P>) {
        self.queue.lock().push(record);

        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };

        if !self.options.batching {
            let writer = Arc::clone(self);
            runtime.spawn(async move {
                if let Err(e) = writer.flush().await {
                    tracing::error!("Flush of {:?} failed: {}", writer.path, e);
                }
            });
        } else if !self.timer_armed.swap(true, Ordering::AcqRel) {
            let writer = Arc::clone(self);
            let debounce = self.options.debounce;
            runtime.spawn(async move {
                tokio::time::sleep(debounce).await;
                writer.timer_armed.store(false, Ordering::Release);
                if let Err(e) = writer.flush().await {
                    tracing::error!("Batched flush of {:?} failed: {}", writer.path, e);
                }
            });
        }
    }

    /// Drain the queue into the file.
    ///
    /// Waits for an in-flight flush first. Append failures are retried with
    /// a fixed backoff; with `max_retries` set, the records are put back at
    /// the head of the queue and `WriteFailed` is returned.
    pub async fn flush(&self) -> StoreResult<()> {
        let _guard = self.flush_lock.lock().await;

        let records = std::mem::take(&mut *self.queue.lock());
        if records.is_empty() {
            return Ok(());
        }

        let buffer = match encode_batch(&records) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.requeue(records);
                return Err(e);
            }
        };

        tracing::debug!(
            "Flushing {} records ({} bytes) to {:?}",
            records.len(),
            buffer.len(),
            self.path
        );

        let mut attempts = 0u32;
        loop {
            match append(&self.path, &buffer).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Error writing {:?} (attempt {}): {}. Retrying...",
                        self.path,
                        attempts,
                        e
                    );

                    if let Some(max) = self.options.max_retries {
                        if attempts >= max {
                            self.requeue(records);
                            return Err(StoreError::WriteFailed {
                                path: self.path.clone(),
                                attempts,
                                error: e.to_string(),
                            });
                        }
                    }

                    tokio::time::sleep(self.options.retry_backoff).await;
                }
            }
        }
    }

    /// Append `records` in one write, bypassing the queue
    pub async fn append_all(&self, records: &[LogRecord<P>]) -> StoreResult<()> {
        let _guard = self.flush_lock.lock().await;
        if records.is_empty() {
            return Ok(());
        }
        let buffer = encode_batch(records)?;
        append(&self.path, &buffer).await?;
        Ok(())
    }

    fn requeue(&self, mut records: Vec<LogRecord<P>>) {
        let mut queue = self.queue.lock();
        records.append(&mut queue);
        *queue = records;
    }
}

/// Encode one record: length prefix followed by the document
pub fn encode_record<P: Serialize>(record: &LogRecord<P>) -> StoreResult<Vec<u8>> {
    let data = rmp_serde::to_vec_named(record)?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + data.len());
    framed.extend_from_slice(&(data.len() as u32).to_be_bytes());
    framed.extend_from_slice(&data);
    Ok(framed)
}

/// Encode records into a single contiguous buffer
pub fn encode_batch<P: Serialize>(records: &[LogRecord<P>]) -> StoreResult<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        buffer.extend(encode_record(record)?);
    }
    Ok(buffer)
}

async fn append(path: &Path, buffer: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buffer).await?;
    file.flush().await?;
    Ok(())
}

/// Outcome of replaying a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records decoded and handed to the callback
    pub records: u64,
    /// Bytes consumed by those records
    pub bytes_read: u64,
    /// File offset of the first corrupt record, if any
    pub truncated_at: Option<u64>,
}

/// Replay every record of the log at `path` in file order.
///
/// A missing file is an empty log.
pub async fn read_log<P, F>(path: &Path, mut on_record: F) -> StoreResult<ReplayStats>
where
    P: DeserializeOwned,
    F: FnMut(LogRecord<P>),
{
    let buffer = match tokio::fs::read(path).await {
        Ok(buffer) => buffer,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ReplayStats::default()),
        Err(e) => return Err(e.into()),
    };

    let mut stats = ReplayStats::default();
    let mut pos = 0usize;

    while pos < buffer.len() {
        match decode_at::<P>(&buffer, pos) {
            Ok((record, next)) => {
                on_record(record);
                stats.records += 1;
                pos = next;
            }
            Err(e) => {
                tracing::warn!(
                    "Log {:?} seems to be corrupt at offset {} (record {}): {}. \
                     Stopping replay after the first corrupt record.",
                    path,
                    pos,
                    stats.records,
                    e
                );
                stats.truncated_at = Some(pos as u64);
                break;
            }
        }
    }

    stats.bytes_read = pos as u64;
    Ok(stats)
}

/// Decode the record starting at `pos`, returning it and the next offset
fn decode_at<P: DeserializeOwned>(buffer: &[u8], pos: usize) -> StoreResult<(LogRecord<P>, usize)> {
    let data_start = pos + LENGTH_PREFIX_SIZE;
    let prefix = buffer
        .get(pos..data_start)
        .ok_or_else(|| StoreError::Corruption("truncated length prefix".to_string()))?;
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

    let data_end = data_start + len;
    let data = buffer.get(data_start..data_end).ok_or_else(|| {
        StoreError::Corruption(format!(
            "record length {} runs past end of file ({} bytes)",
            len,
            buffer.len()
        ))
    })?;

    let record = rmp_serde::from_slice(data)?;
    Ok((record, data_end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::LogOp;
    use serde::Deserialize;
    use std::io::Write;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u64,
        name: String,
    }

    fn entry(id: u64) -> LogRecord<Entry> {
        LogRecord::insert(Entry {
            id,
            name: format!("entry-{}", id),
        })
    }

    async fn replay(path: &Path) -> (Vec<LogRecord<Entry>>, ReplayStats) {
        let mut records = Vec::new();
        let stats = read_log(path, |r| records.push(r)).await.unwrap();
        (records, stats)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_log() {
        let dir = tempdir().unwrap();
        let (records, stats) = replay(&dir.path().join("nothing.data")).await;
        assert!(records.is_empty());
        assert_eq!(stats, ReplayStats::default());
    }

    #[tokio::test]
    async fn test_write_flush_and_replay_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        for i in 0..10 {
            writer.write(entry(i));
        }
        writer.write(LogRecord::delete(Entry {
            id: 3,
            name: String::new(),
        }));
        assert_eq!(writer.pending(), 11);

        writer.flush().await.unwrap();
        assert_eq!(writer.pending(), 0);

        let (records, stats) = replay(&path).await;
        assert_eq!(stats.records, 11);
        assert_eq!(stats.truncated_at, None);
        assert_eq!(records[0], entry(0));
        assert_eq!(records[9], entry(9));
        assert_eq!(records[10].op, LogOp::Delete);
    }

    #[tokio::test]
    async fn test_frame_is_big_endian_length_prefixed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        writer.write(entry(1));
        writer.flush().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + len);
    }

    #[tokio::test]
    async fn test_batched_write_flushes_after_debounce() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("debounce.data");

        let options = WriterOptions {
            debounce: Duration::from_millis(20),
            ..Default::default()
        };
        let writer = LogWriter::new(&path, options);
        writer.write(entry(1));
        writer.write(entry(2));
        assert!(!path.exists());

        tokio::time::sleep(Duration::from_millis(200)).await;
        // Wait for any flush still holding the lock
        writer.flush().await.unwrap();

        let (records, _) = replay(&path).await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_unbatched_writes_keep_program_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unbatched.data");

        let writer = LogWriter::new(&path, WriterOptions::unbatched());
        for i in 0..50 {
            writer.write(entry(i));
        }
        writer.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.flush().await.unwrap();

        let (records, _) = replay(&path).await;
        let ids: Vec<u64> = records.iter().map(|r| r.payload.id).collect();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrent_flushes_do_not_duplicate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("concurrent.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        for i in 0..100 {
            writer.write(entry(i));
        }

        let (a, b) = tokio::join!(writer.flush(), writer.flush());
        a.unwrap();
        b.unwrap();

        let (records, _) = replay(&path).await;
        assert_eq!(records.len(), 100);
    }

    #[tokio::test]
    async fn test_replay_stops_at_first_corrupt_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        writer.write(entry(1));
        writer.write(entry(2));
        writer.flush().await.unwrap();
        let good_len = std::fs::metadata(&path).unwrap().len();

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&3u32.to_be_bytes()).unwrap();
            file.write_all(&[0xc1, 0xc1, 0xc1]).unwrap();
        }
        writer.write(entry(3));
        writer.flush().await.unwrap();

        let (records, stats) = replay(&path).await;
        assert_eq!(records.len(), 2);
        assert_eq!(stats.truncated_at, Some(good_len));
        assert_eq!(stats.bytes_read, good_len);
    }

    #[tokio::test]
    async fn test_replay_stops_at_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        writer.write(entry(1));
        writer.flush().await.unwrap();

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&1000u32.to_be_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let (records, stats) = replay(&path).await;
        assert_eq!(records.len(), 1);
        assert!(stats.truncated_at.is_some());
    }

    #[tokio::test]
    async fn test_bounded_retries_requeue_records() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending
        let path = dir.path().join("is_a_dir");
        std::fs::create_dir(&path).unwrap();

        let options = WriterOptions {
            retry_backoff: Duration::from_millis(1),
            max_retries: Some(3),
            ..Default::default()
        };
        let writer = LogWriter::new(&path, options);
        writer.write(entry(1));
        writer.write(entry(2));

        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed { attempts: 3, .. }));
        assert_eq!(writer.pending(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_retries_keep_every_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocked.data");
        std::fs::create_dir(&path).unwrap();

        let options = WriterOptions {
            debounce: Duration::from_secs(60),
            retry_backoff: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(options.max_retries, None);
        let writer = LogWriter::new(&path, options);
        for i in 0..5 {
            writer.write(entry(i));
        }

        let flushing = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.flush().await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!flushing.is_finished());

        std::fs::remove_dir(&path).unwrap();
        flushing.await.unwrap().unwrap();

        let (records, stats) = replay(&path).await;
        let ids: Vec<u64> = records.iter().map(|r| r.payload.id).collect();
        assert_eq!(ids, (0..5).collect::<Vec<_>>());
        assert_eq!(stats.truncated_at, None);
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn test_append_all_writes_one_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bulk.data");

        let writer = LogWriter::new(&path, WriterOptions::default());
        let records: Vec<_> = (0..5).map(entry).collect();
        writer.append_all(&records).await.unwrap();
        assert_eq!(writer.pending(), 0);

        let (replayed, _) = replay(&path).await;
        assert_eq!(replayed, records);
    }

    #[test]
    fn test_writer_outside_runtime_only_queues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_runtime.data");

        let writer = LogWriter::new(&path, WriterOptions::unbatched());
        writer.write(entry(1));
        assert_eq!(writer.pending(), 1);
        assert!(!path.exists());
    }
}
