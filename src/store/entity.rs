//! Entity handle
//!
//! A borrowed `(store, id)` pair with named accessors. Every method delegates
//! to the index that owns the data.

use crate::index::LabelMap;
use crate::store::engine::EntityStore;
use crate::store::history::HistoryEntry;
use crate::storage::{EntityId, PropValue, StoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Handle to one entity of an `EntityStore`
#[derive(Clone, Copy)]
pub struct Entity<'a> {
    store: &'a EntityStore,
    id: EntityId,
}

/// Everything known about an entity, for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    pub tags: Vec<String>,
    pub props: BTreeMap<String, PropValue>,
    pub relations: LabelMap,
    pub relations_reverse: LabelMap,
    pub has_blob: bool,
    pub history_enabled: bool,
}

impl<'a> Entity<'a> {
    pub(crate) fn new(store: &'a EntityStore, id: EntityId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub async fn tag(&self, tag: &str) -> StoreResult<bool> {
        self.store.tags_mut().await.add_tag(self.id, tag)
    }

    pub async fn untag(&self, tag: &str) -> StoreResult<bool> {
        self.store.tags_mut().await.remove_tag(self.id, tag)
    }

    pub async fn prop(&self, name: &str, value: impl Into<PropValue>) -> StoreResult<bool> {
        self.store.props_mut().await.set_prop(self.id, name, value)
    }

    pub async fn remove_prop(&self, name: &str) -> StoreResult<bool> {
        self.store.props_mut().await.remove_prop(self.id, name)
    }

    /// Relate this entity to `to`
    pub async fn rel(&self, to: EntityId, label: Option<&str>) -> bool {
        self.store.rels_mut().await.add(self.id, to, label)
    }

    pub async fn unrel(&self, to: EntityId, label: Option<&str>) -> bool {
        self.store.rels_mut().await.remove(self.id, to, label)
    }

    /// Tags in stored casing
    pub async fn tags(&self) -> Vec<String> {
        self.store.tags().await.get_tags_by_id(self.id).to_vec()
    }

    pub async fn props(&self) -> BTreeMap<String, PropValue> {
        self.store.props().await.get_props(self.id)
    }

    /// One property, name matched case-insensitively
    pub async fn prop_value(&self, name: &str) -> Option<PropValue> {
        self.store.props().await.get_prop(self.id, name).cloned()
    }

    /// Outgoing relations by label
    pub async fn relations(&self) -> LabelMap {
        self.store.rels().await.get_relations(self.id)
    }

    /// Incoming relations by label
    pub async fn relations_reverse(&self) -> LabelMap {
        self.store.rels().await.get_relations_reverse(self.id)
    }

    pub async fn set_blob(&self, data: impl AsRef<[u8]>) -> StoreResult<()> {
        self.store.blobs().set(self.id, data).await
    }

    pub async fn blob(&self) -> StoreResult<Option<Vec<u8>>> {
        self.store.blobs().get(self.id).await
    }

    pub fn enable_history(&self) -> bool {
        self.store.history().enable(self.id)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.store.history().entries(self.id)
    }

    /// Snapshot of the entity
    pub async fn view(&self) -> EntityView {
        EntityView {
            id: self.id,
            tags: self.tags().await,
            props: self.props().await,
            relations: self.relations().await,
            relations_reverse: self.relations_reverse().await,
            has_blob: self.store.blobs().has(self.id),
            history_enabled: self.store.history().is_enabled(self.id),
        }
    }
}

impl fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity").field("id", &self.id).finish()
    }
}

impl fmt::Display for Entity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
