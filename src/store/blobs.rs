//! Blob Store - one file per entity
//!
//! Blob bytes live in `<data_dir>/blobs/<id>.data`. Which ids own a blob is
//! tracked by a small log, `blob_index.data`, so startup never lists the
//! directory.

use crate::index::SharedAudit;
use crate::storage::{
    compact, read_log, EntityId, IdSet, LogOp, LogRecord, LogSettings, LogWriter, ReplayCounts,
    StoreResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the blob index log inside the data directory
pub const BLOB_INDEX_FILE: &str = "blob_index.data";

/// Name of the directory holding blob files
pub const BLOB_DIR: &str = "blobs";

/// Payload of a blob index record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub id: EntityId,
}

/// File-per-entity blob storage
pub struct BlobStore {
    /// Directory holding the blob files
    dir: PathBuf,
    /// Ids owning a blob
    ids: Mutex<IdSet>,
    writer: Arc<LogWriter<BlobRecord>>,
    audit: Option<SharedAudit>,
}

impl BlobStore {
    /// Open the blob store rooted at `data_dir`
    pub async fn open(
        data_dir: impl AsRef<Path>,
        settings: LogSettings,
        audit: Option<SharedAudit>,
    ) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        let index_path = data_dir.join(BLOB_INDEX_FILE);
        let dir = data_dir.join(BLOB_DIR);

        let mut ids = IdSet::new();
        let mut counts = ReplayCounts::default();
        let stats = read_log::<BlobRecord, _>(&index_path, |record| {
            counts.count(record.op);
            match record.op {
                LogOp::Insert => ids.insert(record.payload.id),
                LogOp::Delete => ids.remove(&record.payload.id),
            };
        })
        .await?;

        tracing::info!(
            "Loaded blob index from {:?}: {} records, {} blobs",
            index_path,
            stats.records,
            ids.len()
        );

        if settings.compaction.should_compact(counts) {
            tracing::info!(
                "Blob index has a delete-to-insert ratio of {:.2}. Optimizing the file.",
                counts.deletes as f64 / counts.inserts.max(1) as f64
            );
            let records = ids
                .iter()
                .map(|&id| LogRecord::insert(BlobRecord { id }))
                .collect();
            compact(&index_path, records).await?;
        }

        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            ids: Mutex::new(ids),
            writer: LogWriter::new(index_path, settings.writer),
            audit,
        })
    }

    /// Path of the file holding the blob of `id`
    pub fn blob_path(&self, id: EntityId) -> PathBuf {
        self.dir.join(format!("{}.data", id))
    }

    /// Store `data` as the blob of `id`, replacing any previous blob
    pub async fn set(&self, id: EntityId, data: impl AsRef<[u8]>) -> StoreResult<()> {
        tokio::fs::write(self.blob_path(id), data.as_ref()).await?;

        self.ids.lock().insert(id);
        self.writer.write(LogRecord::insert(BlobRecord { id }));
        if let Some(audit) = &self.audit {
            audit.record(id, "blob", serde_json::json!({ "operation": "set" }));
        }
        Ok(())
    }

    /// Blob of `id`, or None if it has none
    pub async fn get(&self, id: EntityId) -> StoreResult<Option<Vec<u8>>> {
        if !self.has(id) {
            return Ok(None);
        }
        match tokio::fs::read(self.blob_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Blob {} is indexed but its file is missing", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the blob of `id`. Returns false if it had none.
    pub async fn delete(&self, id: EntityId) -> StoreResult<bool> {
        if !self.has(id) {
            return Ok(false);
        }

        // File first, then the index
        match tokio::fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if !self.ids.lock().remove(&id) {
            return Ok(false);
        }

        self.writer.write(LogRecord::delete(BlobRecord { id }));
        if let Some(audit) = &self.audit {
            audit.record(id, "blob", serde_json::json!({ "operation": "remove" }));
        }
        Ok(true)
    }

    pub fn has(&self, id: EntityId) -> bool {
        self.ids.lock().contains(&id)
    }

    /// Ids owning a blob
    pub fn ids(&self) -> IdSet {
        self.ids.lock().clone()
    }

    /// Highest id owning a blob (0 when empty)
    pub fn max_id(&self) -> EntityId {
        self.ids.lock().last().copied().unwrap_or(0)
    }

    /// Wait until every queued record is in the index log
    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::RecordingAudit;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempdir().unwrap();
        let blobs = BlobStore::open(dir.path(), LogSettings::default(), None)
            .await
            .unwrap();

        assert_eq!(blobs.get(1).await.unwrap(), None);

        blobs.set(1, b"hello").await.unwrap();
        blobs.set(3, "text blob").await.unwrap();
        assert_eq!(blobs.get(1).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(blobs.ids(), IdSet::from([1, 3]));
        assert_eq!(blobs.max_id(), 3);

        assert!(blobs.delete(1).await.unwrap());
        assert!(!blobs.delete(1).await.unwrap());
        assert_eq!(blobs.get(1).await.unwrap(), None);
        assert!(!blobs.blob_path(1).exists());
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let blobs = BlobStore::open(dir.path(), LogSettings::default(), None)
                .await
                .unwrap();
            blobs.set(7, [1u8, 2, 3]).await.unwrap();
            blobs.set(8, [4u8]).await.unwrap();
            blobs.delete(8).await.unwrap();
            blobs.flush().await.unwrap();
        }

        let blobs = BlobStore::open(dir.path(), LogSettings::default(), None)
            .await
            .unwrap();
        assert_eq!(blobs.ids(), IdSet::from([7]));
        assert_eq!(blobs.get(7).await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_blob() {
        let dir = tempdir().unwrap();
        {
            let blobs = BlobStore::open(dir.path(), LogSettings::default(), None)
                .await
                .unwrap();
            blobs.set(4, b"keep").await.unwrap();

            // A directory in place of the blob file cannot be unlinked
            let path = blobs.blob_path(4);
            std::fs::remove_file(&path).unwrap();
            std::fs::create_dir(&path).unwrap();
            std::fs::write(path.join("inner"), b"x").unwrap();

            assert!(blobs.delete(4).await.is_err());
            assert!(blobs.has(4));
            blobs.flush().await.unwrap();
        }

        let blobs = BlobStore::open(dir.path(), LogSettings::default(), None)
            .await
            .unwrap();
        assert_eq!(blobs.ids(), IdSet::from([4]));
    }

    #[tokio::test]
    async fn test_audit_entries() {
        let dir = tempdir().unwrap();
        let audit = Arc::new(RecordingAudit::default());
        let blobs = BlobStore::open(dir.path(), LogSettings::default(), Some(audit.clone()))
            .await
            .unwrap();

        blobs.set(2, b"x").await.unwrap();
        blobs.delete(2).await.unwrap();

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, "blob");
        assert_eq!(entries[0].2["operation"], "set");
        assert_eq!(entries[1].2["operation"], "remove");
    }
}
