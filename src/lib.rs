//! # entitydb
//!
//! Embedded, schema-less entity store. Entities are bare integer ids; what
//! they carry lives in three indices, each backed by its own append-only log:
//!
//! - **Tags**: case-insensitive labels
//! - **Props**: named scalar values, searchable by exact value, prefix,
//!   suffix, contained word and ordering
//! - **Rels**: optionally labelled directed edges, walkable both ways
//!
//! ## Modules
//!
//! - [`storage`]: Log records, batched writer, replay and compaction
//! - [`index`]: Tag, property and relation indices
//! - [`query`]: Query language parser and executor
//! - [`store`]: `EntityStore` context with history, blobs and sequences
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use entitydb::{EntityStore, SearchOptions, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = EntityStore::open(StoreConfig::new("./data")).await?;
//!
//!     let rex = store.create_entity();
//!     rex.tag("dog").await?;
//!     rex.prop("name", "Rex").await?;
//!
//!     let alice = store.create_entity();
//!     alice.tag("person").await?;
//!     alice.rel(rex.id(), Some("likes")).await;
//!
//!     let ids = store
//!         .search("tag:person likes.tag:dog", &SearchOptions::default())
//!         .await?;
//!     println!("dog lovers: {:?}", ids);
//!
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod query;
pub mod storage;
pub mod store;

// Re-export top-level types for convenience
pub use storage::{EntityId, IdSet, LogSettings, PropValue, StoreError, StoreResult, WriterOptions};

pub use index::{AuditSink, IndexStats, PropIndex, RelIndex, TagIndex};

pub use query::{parse_query, Expr, QueryError, QueryResult, SearchContext, SearchOptions};

pub use store::{BlobStore, Entity, EntityStore, EntityView, History, Sequences, StoreConfig, StoreStats};

pub use config::{Config, ConfigError, LoggingConfig};
