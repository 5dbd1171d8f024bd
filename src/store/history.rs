//! Per-entity audit trail
//!
//! History is opt-in per entity: `enable` writes a first "enable" entry and
//! from then on every audited index mutation on that entity is appended.
//! Deleting an entity's history turns it off again.

use crate::index::AuditSink;
use crate::storage::{
    compact, read_log, EntityId, IdSet, LogOp, LogRecord, LogSettings, LogWriter, ReplayCounts,
    StoreResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Mutation family ("enable", "tag", "prop", "rel", "blob", ...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Local time, ISO 8601 without offset
    pub ts: String,
}

/// Payload of a history log record. Deletes carry no entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<HistoryEntry>,
}

#[derive(Default)]
struct HistoryState {
    entries: HashMap<EntityId, Vec<HistoryEntry>>,
    ids: IdSet,
}

/// Append-only audit trail, one entry list per enabled entity
pub struct History {
    state: Mutex<HistoryState>,
    writer: Arc<LogWriter<HistoryRecord>>,
}

impl History {
    /// Open the history log at `path`
    pub async fn open(path: impl Into<PathBuf>, settings: LogSettings) -> StoreResult<Self> {
        let path = path.into();
        let mut state = HistoryState::default();

        let mut counts = ReplayCounts::default();
        let stats = read_log::<HistoryRecord, _>(&path, |record| {
            counts.count(record.op);
            let id = record.payload.id;
            match (record.op, record.payload.entry) {
                (LogOp::Insert, Some(entry)) => {
                    state.entries.entry(id).or_default().push(entry);
                    state.ids.insert(id);
                }
                (LogOp::Insert, None) => {
                    tracing::warn!("History insert for {} without an entry, skipping", id);
                }
                (LogOp::Delete, _) => {
                    state.entries.remove(&id);
                    state.ids.remove(&id);
                }
            }
        })
        .await?;

        tracing::info!(
            "Loaded history from {:?}: {} records, {} entities",
            path,
            stats.records,
            state.ids.len()
        );

        if settings.compaction.should_compact(counts) {
            tracing::info!(
                "History has a delete-to-insert ratio of {:.2}. Optimizing the file.",
                counts.deletes as f64 / counts.inserts.max(1) as f64
            );
            compact(&path, snapshot(&state)).await?;
        }

        Ok(Self {
            state: Mutex::new(state),
            writer: LogWriter::new(&path, settings.writer),
        })
    }

    /// Path of the backing log
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Highest id with history (0 when empty)
    pub fn get_max_id(&self) -> EntityId {
        self.state.lock().ids.last().copied().unwrap_or(0)
    }

    /// Ids with history enabled
    pub fn get_all_ids(&self) -> IdSet {
        self.state.lock().ids.clone()
    }

    pub fn is_enabled(&self, id: EntityId) -> bool {
        self.state.lock().ids.contains(&id)
    }

    /// Start recording history for `id`. Returns false if already enabled.
    pub fn enable(&self, id: EntityId) -> bool {
        if self.is_enabled(id) {
            return false;
        }
        self.add_entry(id, "enable", serde_json::Value::Null, true)
    }

    /// Append an entry. Ignored unless history is enabled for `id` or
    /// `force` is set. Returns whether the entry was recorded.
    pub fn add_entry(
        &self,
        id: EntityId,
        kind: &str,
        data: serde_json::Value,
        force: bool,
    ) -> bool {
        self.add_entry_at(id, kind, data, force, timestamp())
    }

    /// `add_entry` with an explicit timestamp
    pub fn add_entry_at(
        &self,
        id: EntityId,
        kind: &str,
        data: serde_json::Value,
        force: bool,
        ts: String,
    ) -> bool {
        let entry = HistoryEntry {
            kind: kind.to_string(),
            data,
            ts,
        };
        {
            let mut state = self.state.lock();
            if !force && !state.ids.contains(&id) {
                return false;
            }
            state.entries.entry(id).or_default().push(entry.clone());
            state.ids.insert(id);
        }
        self.writer.write(LogRecord::insert(HistoryRecord {
            id,
            entry: Some(entry),
        }));
        true
    }

    /// Entries of `id` in insertion order
    pub fn entries(&self, id: EntityId) -> Vec<HistoryEntry> {
        self.state
            .lock()
            .entries
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Entry with the earliest timestamp
    pub fn first_entry(&self, id: EntityId) -> Option<HistoryEntry> {
        let state = self.state.lock();
        state
            .entries
            .get(&id)?
            .iter()
            .min_by(|a, b| a.ts.cmp(&b.ts))
            .cloned()
    }

    /// Entry with the latest timestamp
    pub fn last_entry(&self, id: EntityId) -> Option<HistoryEntry> {
        let state = self.state.lock();
        state
            .entries
            .get(&id)?
            .iter()
            .max_by(|a, b| a.ts.cmp(&b.ts))
            .cloned()
    }

    /// Drop the history of `id` and disable it. Returns false if not enabled.
    pub fn delete(&self, id: EntityId) -> bool {
        {
            let mut state = self.state.lock();
            if !state.ids.remove(&id) {
                return false;
            }
            state.entries.remove(&id);
        }
        self.writer
            .write(LogRecord::delete(HistoryRecord { id, entry: None }));
        true
    }

    /// Wait until every queued record is in the log
    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }
}

impl AuditSink for History {
    fn record(&self, id: EntityId, kind: &str, data: serde_json::Value) {
        self.add_entry(id, kind, data, false);
    }
}

fn snapshot(state: &HistoryState) -> Vec<LogRecord<HistoryRecord>> {
    state
        .ids
        .iter()
        .flat_map(|&id| {
            state
                .entries
                .get(&id)
                .into_iter()
                .flatten()
                .map(move |entry| {
                    LogRecord::insert(HistoryRecord {
                        id,
                        entry: Some(entry.clone()),
                    })
                })
        })
        .collect()
}

/// Current local time as `YYYY-MM-DDTHH:MM:SS.mmm`
fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}
