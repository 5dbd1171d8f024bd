//! Tag Index - Inverted index for tag membership
//!
//! Maps lowercase tag → ids for case-insensitive lookup, and id → tags in
//! their stored casing for rendering.
//!
//! # Example
//! ```ignore
//! tags.add_tag(1, "Red")?;
//! assert!(tags.get_by_tag("red").contains(&1));
//! assert_eq!(tags.get_tags_by_id(1), &["Red".to_string()]);
//! ```
//!
//! # Design Notes
//! - Two tags that differ only in case may both be stored on one entity;
//!   both satisfy the same lowercase lookup
//! - Replay applies records directly, without logging or auditing

use crate::index::{AuditSink, SharedAudit};
use crate::storage::{
    compact, read_log, EntityId, IdSet, LogOp, LogRecord, LogSettings, LogWriter, ReplayCounts,
    StoreError, StoreResult, EMPTY_IDS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Payload of a tag log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: EntityId,
    pub tag: String,
}

/// Case-insensitive tag index backed by an append-only log
pub struct TagIndex {
    /// lowercase tag → ids
    tag_ids: HashMap<String, IdSet>,
    /// id → tags in stored casing, insertion order
    id_tags: HashMap<EntityId, Vec<String>>,
    /// Every id carrying at least one tag
    ids: IdSet,
    /// Log of tag mutations
    writer: Arc<LogWriter<TagRecord>>,
    /// Optional audit trail
    audit: Option<SharedAudit>,
}

impl TagIndex {
    /// Open the index at `path`, replaying and (if needed) compacting its log
    pub async fn open(
        path: impl Into<PathBuf>,
        settings: LogSettings,
        audit: Option<SharedAudit>,
    ) -> StoreResult<Self> {
        let path = path.into();
        let mut index = Self {
            tag_ids: HashMap::new(),
            id_tags: HashMap::new(),
            ids: IdSet::new(),
            writer: LogWriter::new(&path, settings.writer),
            audit,
        };

        let mut counts = ReplayCounts::default();
        let stats = read_log::<TagRecord, _>(&path, |record| {
            counts.count(record.op);
            let TagRecord { id, tag } = record.payload;
            match record.op {
                LogOp::Insert => index.apply_add(id, tag),
                LogOp::Delete => index.apply_remove(id, &tag),
            };
        })
        .await?;

        tracing::info!(
            "Loaded tags from {:?}: {} records, {} entities",
            path,
            stats.records,
            index.ids.len()
        );

        if settings.compaction.should_compact(counts) {
            tracing::info!(
                "Tags has a delete-to-insert ratio of {:.2}. Optimizing the file.",
                counts.deletes as f64 / counts.inserts.max(1) as f64
            );
            compact(&path, index.snapshot()).await?;
        }

        Ok(index)
    }

    /// Path of the backing log
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Highest id carrying a tag (0 when empty)
    pub fn get_max_id(&self) -> EntityId {
        self.ids.last().copied().unwrap_or(0)
    }

    /// All ids carrying at least one tag
    pub fn get_all_ids(&self) -> &IdSet {
        &self.ids
    }

    /// Tag an entity. Returns false if the exact tag was already present.
    pub fn add_tag(&mut self, id: EntityId, tag: &str) -> StoreResult<bool> {
        validate_tag(tag)?;
        if !self.apply_add(id, tag.to_string()) {
            return Ok(false);
        }

        if let Some(audit) = &self.audit {
            audit.record(id, "tag", serde_json::json!({ "operation": "add", "tag": tag }));
        }
        self.writer.write(LogRecord::insert(TagRecord {
            id,
            tag: tag.to_string(),
        }));
        Ok(true)
    }

    /// Untag an entity. The exact casing is preferred, otherwise any stored
    /// casing of the same tag is removed. Returns false if nothing matched.
    pub fn remove_tag(&mut self, id: EntityId, tag: &str) -> StoreResult<bool> {
        validate_tag(tag)?;
        let Some(stored) = self.resolve_casing(id, tag) else {
            return Ok(false);
        };
        self.apply_remove(id, &stored);

        if let Some(audit) = &self.audit {
            audit.record(
                id,
                "tag",
                serde_json::json!({ "operation": "remove", "tag": stored }),
            );
        }
        self.writer.write(LogRecord::delete(TagRecord { id, tag: stored }));
        Ok(true)
    }

    /// Ids tagged with `tag` (any casing)
    pub fn get_by_tag(&self, tag: &str) -> &IdSet {
        self.tag_ids.get(&tag.to_lowercase()).unwrap_or(&EMPTY_IDS)
    }

    /// Tags of an entity in stored casing
    pub fn get_tags_by_id(&self, id: EntityId) -> &[String] {
        self.id_tags.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether an entity carries `tag` (any casing)
    pub fn has_tag(&self, id: EntityId, tag: &str) -> bool {
        self.get_by_tag(tag).contains(&id)
    }

    /// Number of distinct lowercase tags
    pub fn tag_count(&self) -> usize {
        self.tag_ids.len()
    }

    /// Wait until every queued record is in the log
    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }

    /// Handle to the log writer, for flushing without holding the index
    pub fn writer(&self) -> Arc<LogWriter<TagRecord>> {
        Arc::clone(&self.writer)
    }

    /// Insert records reconstructing the current state
    fn snapshot(&self) -> Vec<LogRecord<TagRecord>> {
        self.ids
            .iter()
            .flat_map(|&id| {
                self.get_tags_by_id(id).iter().map(move |tag| {
                    LogRecord::insert(TagRecord {
                        id,
                        tag: tag.clone(),
                    })
                })
            })
            .collect()
    }

    fn resolve_casing(&self, id: EntityId, tag: &str) -> Option<String> {
        let tags = self.id_tags.get(&id)?;
        if tags.iter().any(|t| t == tag) {
            return Some(tag.to_string());
        }
        let lower = tag.to_lowercase();
        tags.iter().find(|t| t.to_lowercase() == lower).cloned()
    }

    fn apply_add(&mut self, id: EntityId, tag: String) -> bool {
        let tags = self.id_tags.entry(id).or_default();
        if tags.contains(&tag) {
            return false;
        }

        self.tag_ids
            .entry(tag.to_lowercase())
            .or_default()
            .insert(id);
        tags.push(tag);
        self.ids.insert(id);
        true
    }

    fn apply_remove(&mut self, id: EntityId, tag: &str) -> bool {
        let Some(tags) = self.id_tags.get_mut(&id) else {
            return false;
        };
        let Some(pos) = tags.iter().position(|t| t == tag) else {
            return false;
        };
        tags.remove(pos);

        let lower = tag.to_lowercase();
        let other_casing_left = tags.iter().any(|t| t.to_lowercase() == lower);
        if tags.is_empty() {
            self.id_tags.remove(&id);
            self.ids.remove(&id);
        }

        if !other_casing_left {
            if let Some(set) = self.tag_ids.get_mut(&lower) {
                set.remove(&id);
                if set.is_empty() {
                    self.tag_ids.remove(&lower);
                }
            }
        }
        true
    }
}

fn validate_tag(tag: &str) -> StoreResult<()> {
    if tag.is_empty() {
        return Err(StoreError::InvalidArgument("tag must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::RecordingAudit;
    use crate::storage::CompactionPolicy;
    use tempfile::tempdir;

    async fn open(dir: &Path) -> TagIndex {
        TagIndex::open(dir.join("tags.data"), LogSettings::default(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_and_lookup_case_insensitive() {
        let dir = tempdir().unwrap();
        let mut tags = open(dir.path()).await;

        assert!(tags.add_tag(1, "Red").unwrap());
        assert!(tags.add_tag(2, "red").unwrap());
        assert!(!tags.add_tag(2, "red").unwrap());

        assert_eq!(tags.get_by_tag("RED"), &IdSet::from([1, 2]));
        assert_eq!(tags.get_tags_by_id(1), &["Red".to_string()]);
        assert!(tags.get_by_tag("blue").is_empty());
        assert_eq!(tags.get_max_id(), 2);
    }

    #[tokio::test]
    async fn test_casings_coexist() {
        let dir = tempdir().unwrap();
        let mut tags = open(dir.path()).await;

        tags.add_tag(1, "red").unwrap();
        tags.add_tag(1, "Red").unwrap();
        assert_eq!(tags.get_tags_by_id(1).len(), 2);

        tags.remove_tag(1, "red").unwrap();
        assert!(tags.has_tag(1, "red"));
        assert_eq!(tags.get_tags_by_id(1), &["Red".to_string()]);

        tags.remove_tag(1, "RED").unwrap();
        assert!(!tags.has_tag(1, "red"));
        assert!(tags.get_all_ids().is_empty());
    }

    #[tokio::test]
    async fn test_remove_last_tag_drops_id() {
        let dir = tempdir().unwrap();
        let mut tags = open(dir.path()).await;

        tags.add_tag(5, "a").unwrap();
        tags.add_tag(5, "b").unwrap();
        tags.remove_tag(5, "a").unwrap();
        assert!(tags.get_all_ids().contains(&5));
        tags.remove_tag(5, "b").unwrap();
        assert!(!tags.get_all_ids().contains(&5));
        assert!(!tags.remove_tag(5, "b").unwrap());
    }

    #[tokio::test]
    async fn test_empty_tag_is_rejected() {
        let dir = tempdir().unwrap();
        let mut tags = open(dir.path()).await;
        assert!(matches!(
            tags.add_tag(1, ""),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(tags.get_all_ids().is_empty());
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempdir().unwrap();
        {
            let mut tags = open(dir.path()).await;
            tags.add_tag(1, "Red").unwrap();
            tags.add_tag(2, "red").unwrap();
            tags.add_tag(2, "blue").unwrap();
            tags.remove_tag(2, "blue").unwrap();
            tags.flush().await.unwrap();
        }

        let tags = open(dir.path()).await;
        assert_eq!(tags.get_by_tag("red"), &IdSet::from([1, 2]));
        assert!(tags.get_by_tag("blue").is_empty());
        assert_eq!(tags.get_tags_by_id(1), &["Red".to_string()]);
    }

    #[tokio::test]
    async fn test_audit_entries() {
        let dir = tempdir().unwrap();
        let audit = Arc::new(RecordingAudit::default());
        let mut tags = TagIndex::open(
            dir.path().join("tags.data"),
            LogSettings::default(),
            Some(audit.clone()),
        )
        .await
        .unwrap();

        tags.add_tag(3, "x").unwrap();
        tags.add_tag(3, "x").unwrap();
        tags.remove_tag(3, "x").unwrap();

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 3);
        assert_eq!(entries[0].2["operation"], "add");
        assert_eq!(entries[1].2["operation"], "remove");
    }

    #[tokio::test]
    async fn test_compaction_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tags.data");
        let settings = LogSettings {
            compaction: CompactionPolicy {
                min_ratio: 0.2,
                min_deletes: 10,
            },
            ..Default::default()
        };

        {
            let mut tags = TagIndex::open(&path, settings, None).await.unwrap();
            for id in 1..=20 {
                tags.add_tag(id, "tmp").unwrap();
                tags.remove_tag(id, "tmp").unwrap();
            }
            tags.add_tag(7, "Keep").unwrap();
            tags.flush().await.unwrap();
        }

        let tags = TagIndex::open(&path, settings, None).await.unwrap();
        assert_eq!(tags.get_by_tag("keep"), &IdSet::from([7]));
        assert!(dir.path().join("tags.data_1").exists());

        let compacted = TagIndex::open(&path, settings, None).await.unwrap();
        assert_eq!(compacted.get_all_ids(), &IdSet::from([7]));
        assert_eq!(compacted.get_tags_by_id(7), &["Keep".to_string()]);
        assert!(!dir.path().join("tags.data_2").exists());
    }
}
