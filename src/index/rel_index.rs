//! Relation Index - directed, labeled edges between entities
//!
//! Four structures are kept in lockstep:
//!
//! ```text
//! forward          from → label → {to}
//! forward_merged   from → {to}            (any label)
//! reverse          to   → label → {from}
//! reverse_merged   to   → {from}          (any label)
//! ```
//!
//! An id belongs to the index's id set exactly while it appears as a key of
//! `forward_merged` or `reverse_merged`. Labels are stored lowercase; a
//! missing label is the empty string.

use crate::index::{AuditSink, SharedAudit};
use crate::storage::{
    compact, read_log, EntityId, IdSet, LogOp, LogRecord, LogSettings, LogWriter, ReplayCounts,
    StoreResult, EMPTY_IDS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Payload of a relation log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelRecord {
    pub from: EntityId,
    pub to: EntityId,
    #[serde(default)]
    pub label: String,
}

/// Label → ids map of one entity
pub type LabelMap = BTreeMap<String, IdSet>;

/// Normalize a relation label: lowercase, absent = ""
pub fn normalize_label(label: Option<&str>) -> String {
    label.map(str::to_lowercase).unwrap_or_default()
}

/// One direction of the relation graph
#[derive(Debug, Default)]
struct Adjacency {
    by_label: HashMap<EntityId, LabelMap>,
    merged: HashMap<EntityId, IdSet>,
}

impl Adjacency {
    fn contains(&self, a: EntityId, b: EntityId, label: &str) -> bool {
        self.by_label
            .get(&a)
            .and_then(|labels| labels.get(label))
            .is_some_and(|ids| ids.contains(&b))
    }

    fn link(&mut self, a: EntityId, b: EntityId, label: &str) {
        self.by_label
            .entry(a)
            .or_default()
            .entry(label.to_string())
            .or_default()
            .insert(b);
        self.merged.entry(a).or_default().insert(b);
    }

    fn unlink(&mut self, a: EntityId, b: EntityId, label: &str) -> bool {
        let Some(labels) = self.by_label.get_mut(&a) else {
            return false;
        };
        let Some(ids) = labels.get_mut(label) else {
            return false;
        };
        if !ids.remove(&b) {
            return false;
        }
        if ids.is_empty() {
            labels.remove(label);
        }

        let still_linked = labels.values().any(|ids| ids.contains(&b));
        if labels.is_empty() {
            self.by_label.remove(&a);
        }

        if !still_linked {
            if let Some(merged) = self.merged.get_mut(&a) {
                merged.remove(&b);
                if merged.is_empty() {
                    self.merged.remove(&a);
                }
            }
        }
        true
    }

    fn get(&self, a: EntityId, label: Option<&str>) -> &IdSet {
        match label {
            Some(label) => self
                .by_label
                .get(&a)
                .and_then(|labels| labels.get(&label.to_lowercase()))
                .unwrap_or(&EMPTY_IDS),
            None => self.merged.get(&a).unwrap_or(&EMPTY_IDS),
        }
    }

    fn has(&self, a: EntityId) -> bool {
        self.merged.contains_key(&a)
    }
}

/// Relation index backed by an append-only log
pub struct RelIndex {
    forward: Adjacency,
    reverse: Adjacency,
    /// Every id touched by at least one edge
    ids: IdSet,
    /// Log of relation mutations
    writer: Arc<LogWriter<RelRecord>>,
    /// Optional audit trail
    audit: Option<SharedAudit>,
}

impl RelIndex {
    /// Open the index at `path`, replaying and (if needed) compacting its log
    pub async fn open(
        path: impl Into<PathBuf>,
        settings: LogSettings,
        audit: Option<SharedAudit>,
    ) -> StoreResult<Self> {
        let path = path.into();
        let mut index = Self {
            forward: Adjacency::default(),
            reverse: Adjacency::default(),
            ids: IdSet::new(),
            writer: LogWriter::new(&path, settings.writer),
            audit,
        };

        let mut counts = ReplayCounts::default();
        let stats = read_log::<RelRecord, _>(&path, |record| {
            counts.count(record.op);
            let RelRecord { from, to, label } = record.payload;
            let label = label.to_lowercase();
            match record.op {
                LogOp::Insert => index.apply_add(from, to, &label),
                LogOp::Delete => index.apply_remove(from, to, &label),
            };
        })
        .await?;

        tracing::info!(
            "Loaded relations from {:?}: {} records, {} entities",
            path,
            stats.records,
            index.ids.len()
        );

        if settings.compaction.should_compact(counts) {
            tracing::info!(
                "Relations has a delete-to-insert ratio of {:.2}. Optimizing the file.",
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

    /// Highest id touched by an edge (0 when empty)
    pub fn get_max_id(&self) -> EntityId {
        self.ids.last().copied().unwrap_or(0)
    }

    /// All ids touched by at least one edge
    pub fn get_all_ids(&self) -> &IdSet {
        &self.ids
    }

    /// Relate `from` to `to`. Returns false if the edge already existed.
    pub fn add(&mut self, from: EntityId, to: EntityId, label: Option<&str>) -> bool {
        let label = normalize_label(label);
        if !self.apply_add(from, to, &label) {
            return false;
        }

        if let Some(audit) = &self.audit {
            audit.record(
                from,
                "rel",
                serde_json::json!({ "operation": "add", "rel": label, "id1": from, "id2": to }),
            );
            audit.record(
                to,
                "rel",
                serde_json::json!({ "operation": "add-rev", "rel": label, "id1": from, "id2": to }),
            );
        }
        self.writer
            .write(LogRecord::insert(RelRecord { from, to, label }));
        true
    }

    /// Remove the edge `from → to` with `label`. Returns false if absent.
    pub fn remove(&mut self, from: EntityId, to: EntityId, label: Option<&str>) -> bool {
        let label = normalize_label(label);
        if !self.apply_remove(from, to, &label) {
            return false;
        }

        if let Some(audit) = &self.audit {
            audit.record(
                from,
                "rel",
                serde_json::json!({ "operation": "remove", "rel": label, "id1": from, "id2": to }),
            );
            audit.record(
                to,
                "rel",
                serde_json::json!({ "operation": "remove-rev", "rel": label, "id1": from, "id2": to }),
            );
        }
        self.writer
            .write(LogRecord::delete(RelRecord { from, to, label }));
        true
    }

    /// Ids that `id` relates to, with `label` or with any label
    pub fn get_related(&self, id: EntityId, label: Option<&str>) -> &IdSet {
        self.forward.get(id, label)
    }

    /// Ids that relate to `id`, with `label` or with any label
    pub fn get_related_reverse(&self, id: EntityId, label: Option<&str>) -> &IdSet {
        self.reverse.get(id, label)
    }

    /// Outgoing edges of `id` grouped by label
    pub fn get_relations(&self, id: EntityId) -> LabelMap {
        self.forward.by_label.get(&id).cloned().unwrap_or_default()
    }

    /// Incoming edges of `id` grouped by label
    pub fn get_relations_reverse(&self, id: EntityId) -> LabelMap {
        self.reverse.by_label.get(&id).cloned().unwrap_or_default()
    }

    /// Whether the edge exists
    pub fn has_relation(&self, from: EntityId, to: EntityId, label: Option<&str>) -> bool {
        self.forward.contains(from, to, &normalize_label(label))
    }

    /// Wait until every queued record is in the log
    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }

    /// Handle to the log writer, for flushing without holding the index
    pub fn writer(&self) -> Arc<LogWriter<RelRecord>> {
        Arc::clone(&self.writer)
    }

    /// One insert per surviving (from, to, label) triple
    fn snapshot(&self) -> Vec<LogRecord<RelRecord>> {
        let mut records = Vec::new();
        for &from in &self.ids {
            let Some(labels) = self.forward.by_label.get(&from) else {
                continue;
            };
            for (label, targets) in labels {
                for &to in targets {
                    records.push(LogRecord::insert(RelRecord {
                        from,
                        to,
                        label: label.clone(),
                    }));
                }
            }
        }
        records
    }

    fn apply_add(&mut self, from: EntityId, to: EntityId, label: &str) -> bool {
        if self.forward.contains(from, to, label) {
            return false;
        }
        self.forward.link(from, to, label);
        self.reverse.link(to, from, label);
        self.ids.insert(from);
        self.ids.insert(to);
        true
    }

    fn apply_remove(&mut self, from: EntityId, to: EntityId, label: &str) -> bool {
        if !self.forward.unlink(from, to, label) {
            return false;
        }
        self.reverse.unlink(to, from, label);

        for id in [from, to] {
            if !self.forward.has(id) && !self.reverse.has(id) {
                self.ids.remove(&id);
            }
        }
        true
    }
}
