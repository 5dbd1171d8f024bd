//! Property Index - per-entity property bags with a value index
//!
//! Each entity owns an ordered bag of `name → PropValue`. Names are unique per
//! entity case-insensitively; the stored casing is whatever was set last.
//!
//! Lookup goes through the value index, keyed by
//! `lower(name) + "__" + lower(first 100 chars of the value as text)`:
//!
//! ```text
//! set_prop(4, "Color", "Red")   →  value_ids["color__red"] = {4}
//! get_ids_by_prop("color", None) →  union of every "color__*" bucket
//! ```

use crate::index::contains::{words_of, ContainsIndex};
use crate::index::{AuditSink, SharedAudit};
use crate::storage::{
    compact, read_log, EntityId, IdSet, LogOp, LogRecord, LogSettings, LogWriter, PropValue,
    ReplayCounts, StoreError, StoreResult, EMPTY_IDS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Number of value characters that take part in the index key
pub const VALUE_KEY_CHARS: usize = 100;

/// Separator between name and value in index keys
pub const KEY_SEPARATOR: &str = "__";

/// Payload of a property log record. Deletes carry no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropValue>,
}

/// Index key for a name/value pair
pub fn value_key(name: &str, value_text: &str) -> String {
    let truncated: String = value_text.chars().take(VALUE_KEY_CHARS).collect();
    format!("{}{}{}", name, KEY_SEPARATOR, truncated).to_lowercase()
}

/// Properties of one entity
#[derive(Debug, Default)]
struct PropBag {
    /// Stored name → value
    values: BTreeMap<String, PropValue>,
    /// lowercase name → stored name
    casing: HashMap<String, String>,
}

impl PropBag {
    /// Stored casing for `name`: exact match first, then case-insensitive
    fn resolve<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.values.contains_key(name) {
            return Some(name);
        }
        self.casing.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Property index backed by an append-only log
pub struct PropIndex {
    /// id → property bag
    bags: HashMap<EntityId, PropBag>,
    /// value key → ids
    value_ids: BTreeMap<String, IdSet>,
    /// Every id with at least one property
    ids: IdSet,
    /// Optional word index for contains queries
    contains: Option<ContainsIndex>,
    /// Log of property mutations
    writer: Arc<LogWriter<PropRecord>>,
    /// Optional audit trail
    audit: Option<SharedAudit>,
}

impl PropIndex {
    /// Open the index at `path`, replaying and (if needed) compacting its log
    pub async fn open(
        path: impl Into<PathBuf>,
        settings: LogSettings,
        audit: Option<SharedAudit>,
    ) -> StoreResult<Self> {
        let path = path.into();
        let mut index = Self {
            bags: HashMap::new(),
            value_ids: BTreeMap::new(),
            ids: IdSet::new(),
            contains: None,
            writer: LogWriter::new(&path, settings.writer),
            audit,
        };

        let mut counts = ReplayCounts::default();
        let stats = read_log::<PropRecord, _>(&path, |record| {
            counts.count(record.op);
            let PropRecord { id, name, value } = record.payload;
            match record.op {
                LogOp::Insert => {
                    index.apply_set(id, &name, value.unwrap_or_else(|| PropValue::from("")));
                }
                LogOp::Delete => {
                    index.apply_remove(id, &name);
                }
            }
        })
        .await?;

        tracing::info!(
            "Loaded props from {:?}: {} records, {} entities",
            path,
            stats.records,
            index.ids.len()
        );

        if settings.compaction.should_compact(counts) {
            tracing::info!(
                "Props has a delete-to-insert ratio of {:.2}. Optimizing the file.",
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

    /// Highest id with a property (0 when empty)
    pub fn get_max_id(&self) -> EntityId {
        self.ids.last().copied().unwrap_or(0)
    }

    /// All ids with at least one property
    pub fn get_all_ids(&self) -> &IdSet {
        &self.ids
    }

    /// Set a property. An existing property whose name differs only in case
    /// is replaced. Returns false if nothing changed.
    pub fn set_prop(
        &mut self,
        id: EntityId,
        name: &str,
        value: impl Into<PropValue>,
    ) -> StoreResult<bool> {
        validate_name(name)?;
        let value = value.into();

        let SetOutcome {
            changed,
            replaced_casing,
        } = self.apply_set(id, name, value.clone());
        if !changed {
            return Ok(false);
        }

        if let Some(old) = replaced_casing {
            self.writer.write(LogRecord::delete(PropRecord {
                id,
                name: old,
                value: None,
            }));
        }
        if let Some(audit) = &self.audit {
            audit.record(
                id,
                "prop",
                serde_json::json!({ "operation": "set", "prop": name, "value": value }),
            );
        }
        self.writer.write(LogRecord::insert(PropRecord {
            id,
            name: name.to_string(),
            value: Some(value),
        }));
        Ok(true)
    }

    /// Remove a property (any casing). Returns false if it was not set.
    pub fn remove_prop(&mut self, id: EntityId, name: &str) -> StoreResult<bool> {
        validate_name(name)?;
        let Some(stored) = self
            .bags
            .get(&id)
            .and_then(|bag| bag.resolve(name))
            .map(str::to_string)
        else {
            return Ok(false);
        };

        self.apply_remove(id, &stored);

        if let Some(audit) = &self.audit {
            audit.record(
                id,
                "prop",
                serde_json::json!({ "operation": "remove", "prop": stored }),
            );
        }
        self.writer.write(LogRecord::delete(PropRecord {
            id,
            name: stored,
            value: None,
        }));
        Ok(true)
    }

    /// Ids having property `name`, optionally restricted to one value (as text,
    /// compared case-insensitively)
    pub fn get_ids_by_prop(&self, name: &str, value: Option<&str>) -> IdSet {
        match value {
            Some(value) => self
                .value_ids
                .get(&value_key(name, value))
                .cloned()
                .unwrap_or_default(),
            None => {
                let prefix = format!("{}{}", name.to_lowercase(), KEY_SEPARATOR);
                self.value_ids
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect()
            }
        }
    }

    /// Ids whose `name` value starts with `prefix` (case-insensitive). Only
    /// exact for prefixes up to `VALUE_KEY_CHARS` characters.
    pub fn get_ids_by_value_prefix(&self, name: &str, prefix: &str) -> IdSet {
        let start = value_key(name, prefix);
        self.value_ids
            .range(start.clone()..)
            .take_while(|(key, _)| key.starts_with(&start))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Ids in the exact value bucket for `name`/`value`
    pub fn get_ids_by_value(&self, name: &str, value: &PropValue) -> &IdSet {
        self.value_ids
            .get(&value_key(name, &value.as_text()))
            .unwrap_or(&EMPTY_IDS)
    }

    /// All properties of an entity in stored casing
    pub fn get_props(&self, id: EntityId) -> BTreeMap<String, PropValue> {
        self.bags
            .get(&id)
            .map(|bag| bag.values.clone())
            .unwrap_or_default()
    }

    /// One property of an entity, looked up case-insensitively
    pub fn get_prop(&self, id: EntityId, name: &str) -> Option<&PropValue> {
        let bag = self.bags.get(&id)?;
        let stored = bag.resolve(name)?;
        bag.values.get(stored)
    }

    /// Start maintaining the word index used by contains queries
    pub fn enable_contains_index(&mut self) {
        if self.contains.is_some() {
            return;
        }
        self.contains = Some(ContainsIndex::build(
            self.bags.iter().map(|(&id, bag)| (id, &bag.values)),
        ));
    }

    /// Word index, if enabled
    pub fn contains_index(&self) -> Option<&ContainsIndex> {
        self.contains.as_ref()
    }

    /// Wait until every queued record is in the log
    pub async fn flush(&self) -> StoreResult<()> {
        self.writer.flush().await
    }

    /// Handle to the log writer, for flushing without holding the index
    pub fn writer(&self) -> Arc<LogWriter<PropRecord>> {
        Arc::clone(&self.writer)
    }

    /// Insert records reconstructing the current state
    fn snapshot(&self) -> Vec<LogRecord<PropRecord>> {
        self.ids
            .iter()
            .filter_map(|id| self.bags.get(id).map(|bag| (*id, bag)))
            .flat_map(|(id, bag)| {
                bag.values.iter().map(move |(name, value)| {
                    LogRecord::insert(PropRecord {
                        id,
                        name: name.clone(),
                        value: Some(value.clone()),
                    })
                })
            })
            .collect()
    }

    fn apply_set(&mut self, id: EntityId, name: &str, value: PropValue) -> SetOutcome {
        let resolved = self
            .bags
            .get(&id)
            .and_then(|bag| bag.resolve(name))
            .map(str::to_string);

        if resolved.as_deref() == Some(name) {
            let unchanged = self
                .bags
                .get(&id)
                .and_then(|bag| bag.values.get(name))
                .is_some_and(|old| *old == value);
            if unchanged {
                return SetOutcome::default();
            }
        }

        let replaced_casing = match resolved {
            Some(old) if old != name => {
                self.apply_remove(id, &old);
                Some(old)
            }
            _ => None,
        };

        let old_words = self.words_for(id);

        let bag = self.bags.entry(id).or_default();
        let previous = bag.values.insert(name.to_string(), value.clone());
        bag.casing.insert(name.to_lowercase(), name.to_string());
        self.ids.insert(id);

        if let Some(previous) = previous {
            self.unindex_value(id, name, &previous);
        }
        self.value_ids
            .entry(value_key(name, &value.as_text()))
            .or_default()
            .insert(id);

        self.refresh_words(id, old_words);

        SetOutcome {
            changed: true,
            replaced_casing,
        }
    }

    fn apply_remove(&mut self, id: EntityId, name: &str) -> bool {
        let old_words = self.words_for(id);

        let Some(bag) = self.bags.get_mut(&id) else {
            return false;
        };
        let Some(value) = bag.values.remove(name) else {
            return false;
        };
        let lower = name.to_lowercase();
        if bag.casing.get(&lower).map(String::as_str) == Some(name) {
            bag.casing.remove(&lower);
        }
        if bag.values.is_empty() {
            self.bags.remove(&id);
            self.ids.remove(&id);
        }

        self.unindex_value(id, name, &value);
        self.refresh_words(id, old_words);
        true
    }

    fn unindex_value(&mut self, id: EntityId, name: &str, value: &PropValue) {
        let key = value_key(name, &value.as_text());
        if let Some(ids) = self.value_ids.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.value_ids.remove(&key);
            }
        }
    }

    fn words_for(&self, id: EntityId) -> Option<BTreeSet<String>> {
        self.contains.as_ref()?;
        Some(
            self.bags
                .get(&id)
                .map(|bag| words_of(bag.values.values()))
                .unwrap_or_default(),
        )
    }

    fn refresh_words(&mut self, id: EntityId, old_words: Option<BTreeSet<String>>) {
        let Some(old_words) = old_words else {
            return;
        };
        let new_words = self.words_for(id).unwrap_or_default();
        if let Some(contains) = self.contains.as_mut() {
            contains.reindex(id, &old_words, &new_words);
        }
    }
}

#[derive(Debug, Default)]
struct SetOutcome {
    changed: bool,
    replaced_casing: Option<String>,
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidArgument(
            "property name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::RecordingAudit;
    use crate::storage::CompactionPolicy;
    use proptest::prelude::*;
    use tempfile::tempdir;

    async fn open(dir: &Path) -> PropIndex {
        PropIndex::open(dir.join("props.data"), LogSettings::default(), None)
            .await
            .unwrap()
    }

    #[test]
    fn test_value_key() {
        assert_eq!(value_key("Color", "Red"), "color__red");
        let long = "x".repeat(150);
        assert_eq!(value_key("n", &long).len(), 3 + VALUE_KEY_CHARS);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let dir = tempdir().unwrap();
        let mut props = open(dir.path()).await;

        assert!(props.set_prop(1, "title", "Hello").unwrap());
        assert!(props.set_prop(1, "count", 3i64).unwrap());
        assert!(!props.set_prop(1, "title", "Hello").unwrap());

        assert_eq!(props.get_prop(1, "TITLE"), Some(&PropValue::from("Hello")));
        assert_eq!(props.get_props(1).len(), 2);
        assert_eq!(props.get_ids_by_prop("title", Some("hello")), IdSet::from([1]));
        assert_eq!(props.get_ids_by_prop("count", Some("3")), IdSet::from([1]));
        assert_eq!(props.get_max_id(), 1);
    }

    #[tokio::test]
    async fn test_new_casing_replaces_old() {
        let dir = tempdir().unwrap();
        let mut props = open(dir.path()).await;

        props.set_prop(1, "Name", "a").unwrap();
        props.set_prop(1, "NAME", "b").unwrap();

        let bag = props.get_props(1);
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("NAME"), Some(&PropValue::from("b")));
        assert!(props.get_ids_by_prop("name", Some("a")).is_empty());
        assert_eq!(props.get_ids_by_prop("name", Some("B")), IdSet::from([1]));
    }

    #[tokio::test]
    async fn test_update_moves_value_bucket() {
        let dir = tempdir().unwrap();
        let mut props = open(dir.path()).await;

        props.set_prop(1, "status", "open").unwrap();
        props.set_prop(2, "status", "open").unwrap();
        props.set_prop(1, "status", "closed").unwrap();

        assert_eq!(props.get_ids_by_prop("status", Some("open")), IdSet::from([2]));
        assert_eq!(props.get_ids_by_prop("status", Some("closed")), IdSet::from([1]));
        assert_eq!(props.get_ids_by_prop("status", None), IdSet::from([1, 2]));
        assert!(props.get_ids_by_prop("stat", None).is_empty());
    }

    #[tokio::test]
    async fn test_remove_prop() {
        let dir = tempdir().unwrap();
        let mut props = open(dir.path()).await;

        props.set_prop(4, "a", "1").unwrap();
        props.set_prop(4, "b", "2").unwrap();
        assert!(props.remove_prop(4, "A").unwrap());
        assert!(props.get_all_ids().contains(&4));
        assert!(props.remove_prop(4, "b").unwrap());
        assert!(!props.get_all_ids().contains(&4));
        assert!(!props.remove_prop(4, "b").unwrap());
        assert!(props.get_ids_by_prop("a", None).is_empty());
    }

    #[tokio::test]
    async fn test_casing_change_is_audited_once() {
        let dir = tempdir().unwrap();
        let audit = Arc::new(RecordingAudit::default());
        let mut props = PropIndex::open(
            dir.path().join("props.data"),
            LogSettings::default(),
            Some(audit.clone()),
        )
        .await
        .unwrap();

        props.set_prop(1, "Name", "a").unwrap();
        props.set_prop(1, "name", "a").unwrap();

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.2["operation"] == "set"));
    }

    #[tokio::test]
    async fn test_persistence_with_casing_change() {
        let dir = tempdir().unwrap();
        {
            let mut props = open(dir.path()).await;
            props.set_prop(1, "Name", "first").unwrap();
            props.set_prop(1, "name", "second").unwrap();
            props.set_prop(2, "flag", true).unwrap();
            props.set_prop(3, "gone", "x").unwrap();
            props.remove_prop(3, "gone").unwrap();
            props.flush().await.unwrap();
        }

        let props = open(dir.path()).await;
        let bag = props.get_props(1);
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("name"), Some(&PropValue::from("second")));
        assert_eq!(props.get_prop(2, "flag"), Some(&PropValue::Bool(true)));
        assert_eq!(props.get_all_ids(), &IdSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_contains_index_tracks_updates() {
        let dir = tempdir().unwrap();
        let mut props = open(dir.path()).await;
        props.set_prop(1, "title", "Red Apple").unwrap();
        props.enable_contains_index();
        props.set_prop(2, "title", "Green apple").unwrap();
        props.set_prop(1, "title", "Red pear").unwrap();

        let contains = props.contains_index().unwrap();
        assert_eq!(contains.ids_for_word("apple"), Some(&IdSet::from([2])));
        assert_eq!(contains.ids_for_word("pear"), Some(&IdSet::from([1])));

        props.remove_prop(1, "title").unwrap();
        assert_eq!(props.contains_index().unwrap().ids_for_word("pear"), None);
    }

    #[tokio::test]
    async fn test_compaction_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props.data");
        let settings = LogSettings {
            compaction: CompactionPolicy {
                min_ratio: 0.2,
                min_deletes: 5,
            },
            ..Default::default()
        };

        {
            let mut props = PropIndex::open(&path, settings, None).await.unwrap();
            for i in 0..10 {
                props.set_prop(1, "n", i as i64).unwrap();
                props.remove_prop(1, "n").unwrap();
            }
            props.set_prop(1, "Title", "kept").unwrap();
            props.set_prop(2, "x", 1.5).unwrap();
            props.flush().await.unwrap();
        }

        let before = PropIndex::open(&path, settings, None).await.unwrap();
        let after = PropIndex::open(&path, settings, None).await.unwrap();
        for id in [1, 2, 3] {
            assert_eq!(before.get_props(id), after.get_props(id));
        }
        assert_eq!(after.get_ids_by_prop("title", Some("KEPT")), IdSet::from([1]));
        assert_eq!(after.get_all_ids(), &IdSet::from([1, 2]));
        assert!(dir.path().join("props.data_1").exists());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(EntityId, String, i64),
        Remove(EntityId, String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let name = prop::sample::select(vec!["a", "A", "b", "B", "title"]).prop_map(String::from);
        prop_oneof![
            (1u64..5, name.clone(), 0i64..3).prop_map(|(id, n, v)| Op::Set(id, n, v)),
            (1u64..5, name).prop_map(|(id, n)| Op::Remove(id, n)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn replay_reproduces_live_state(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let dir = tempdir().unwrap();
                let path = dir.path().join("props.data");

                let mut live = PropIndex::open(&path, LogSettings::default(), None).await.unwrap();
                for op in &ops {
                    match op {
                        Op::Set(id, name, value) => { live.set_prop(*id, name, *value).unwrap(); }
                        Op::Remove(id, name) => { live.remove_prop(*id, name).unwrap(); }
                    }
                }
                live.flush().await.unwrap();

                let replayed = PropIndex::open(&path, LogSettings::default(), None).await.unwrap();
                assert_eq!(live.get_all_ids(), replayed.get_all_ids());
                for id in 1..5 {
                    assert_eq!(live.get_props(id), replayed.get_props(id));
                    for name in ["a", "b", "title"] {
                        assert!(live.get_props(id).keys().filter(|k| k.to_lowercase() == name).count() <= 1);
                    }
                }
            });
        }
    }
}
