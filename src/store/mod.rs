//! entitydb Store Context
//!
//! Ties the indices and their collaborators to one data directory:
//!
//! - **engine**: `EntityStore`, opened once and passed around explicitly
//! - **entity**: `Entity` handle with named accessors
//! - **history**: per-entity audit trail, the `AuditSink` of the indices
//! - **blobs**: one file per entity under `blobs/`
//! - **sequence**: monotonic counters per context
//!
//! # Files
//!
//! ```text
//! <data_dir>/
//!   tags.data  props.data  rels.data
//!   history.data  blob_index.data  sequences.data
//!   blobs/<id>.data
//! ```

pub mod blobs;
pub mod engine;
pub mod entity;
pub mod history;
pub mod sequence;

pub use blobs::BlobStore;
pub use engine::{EntityStore, StoreConfig, StoreStats};
pub use entity::{Entity, EntityView};
pub use history::{History, HistoryEntry};
pub use sequence::Sequences;
