//! entitydb Index Structures
//!
//! Each index owns one append-only log and keeps its full state in memory:
//!
//! - **TagIndex**: lowercase tag → ids, id → tags
//! - **PropIndex**: per-entity property bags plus a sorted `name__value` index
//! - **RelIndex**: labeled edges in both directions
//! - **ContainsIndex**: word → ids over string values, maintained by `PropIndex`
//!
//! # Architecture
//!
//! ```text
//! Query: "tag:person name=^ali likes.tag:dog"
//!        ↓
//! TagIndex:  ids tagged "person"
//!        ↓
//! PropIndex: range scan "name__ali".. within that set
//!        ↓
//! RelIndex:  keep ids whose "likes" edges reach a "dog"
//! ```

mod contains;
mod prop_index;
mod rel_index;
mod tag_index;

pub use contains::{words, words_of, ContainsIndex};
pub use prop_index::{value_key, PropIndex, PropRecord, KEY_SEPARATOR, VALUE_KEY_CHARS};
pub use rel_index::{normalize_label, LabelMap, RelIndex, RelRecord};
pub use tag_index::{TagIndex, TagRecord};

use crate::storage::EntityId;
use std::sync::Arc;

/// Receives one entry per successful index mutation
pub trait AuditSink: Send + Sync {
    /// `kind` is the mutation family ("tag", "prop", "rel", "blob")
    fn record(&self, id: EntityId, kind: &str, data: serde_json::Value);
}

/// Audit sink shared between the indices of one store
pub type SharedAudit = Arc<dyn AuditSink>;

/// Sizes of the in-memory indices
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    /// Ids carrying at least one tag
    pub tagged: usize,
    /// Distinct lowercase tags
    pub tags: usize,
    /// Ids carrying at least one property
    pub with_props: usize,
    /// Ids touched by at least one relation
    pub related: usize,
    /// Distinct words in the contains index (0 when disabled)
    pub words: usize,
}
