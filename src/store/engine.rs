//! entitydb Entity Store
//!
//! The store context owns every log-backed store of one data directory:
//! - Write path: Entity → index (in memory, visible now) → LogWriter → file
//! - Read path: search → parse → QueryExecutor over read guards of the indices
//!
//! Indices sit behind Tokio's async RwLock; mutations only hold the write
//! guard for the in-memory update, never across log I/O.

use crate::index::{IndexStats, PropIndex, RelIndex, SharedAudit, TagIndex};
use crate::query::{search, QueryResult, SearchContext, SearchOptions};
use crate::store::blobs::BlobStore;
use crate::store::entity::Entity;
use crate::store::history::History;
use crate::store::sequence::Sequences;
use crate::storage::{EntityId, IdSet, LogSettings, StoreResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Configuration for the entity store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Root directory for all logs and blobs
    pub data_dir: PathBuf,
    /// Writer and compaction settings shared by every log
    pub log: LogSettings,
    /// Maintain the word index for `prop:name~value` queries
    pub contains_index: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("entitydb_data"),
            log: LogSettings::default(),
            contains_index: true,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn tags_path(&self) -> PathBuf {
        self.data_dir.join("tags.data")
    }

    pub fn props_path(&self) -> PathBuf {
        self.data_dir.join("props.data")
    }

    pub fn rels_path(&self) -> PathBuf {
        self.data_dir.join("rels.data")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.data")
    }

    pub fn sequences_path(&self) -> PathBuf {
        self.data_dir.join("sequences.data")
    }
}

/// Store-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Id the next created entity will get
    pub next_id: EntityId,
    /// Ids known to any store
    pub entities: usize,
    /// Index sizes
    pub index: IndexStats,
    /// Ids owning a blob
    pub blobs: usize,
    /// Ids with history enabled
    pub history: usize,
}

/// Entity store context
pub struct EntityStore {
    config: StoreConfig,
    tags: RwLock<TagIndex>,
    props: RwLock<PropIndex>,
    rels: RwLock<RelIndex>,
    history: Arc<History>,
    blobs: BlobStore,
    sequences: Sequences,
    next_id: AtomicU64,
}

impl EntityStore {
    /// Open (or create) the store in `config.data_dir`, replaying every log
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let history = Arc::new(History::open(config.history_path(), config.log).await?);
        let audit: SharedAudit = history.clone();

        let tags = TagIndex::open(config.tags_path(), config.log, Some(audit.clone())).await?;
        let mut props =
            PropIndex::open(config.props_path(), config.log, Some(audit.clone())).await?;
        if config.contains_index {
            props.enable_contains_index();
        }
        let rels = RelIndex::open(config.rels_path(), config.log, Some(audit.clone())).await?;
        let blobs = BlobStore::open(&config.data_dir, config.log, Some(audit)).await?;
        let sequences = Sequences::open(config.sequences_path(), config.log).await?;

        let max_id = [
            tags.get_max_id(),
            props.get_max_id(),
            rels.get_max_id(),
            blobs.max_id(),
            history.get_max_id(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        tracing::info!(
            "Opened entity store at {:?}, next id {}",
            config.data_dir,
            max_id + 1
        );

        Ok(Self {
            config,
            tags: RwLock::new(tags),
            props: RwLock::new(props),
            rels: RwLock::new(rels),
            history,
            blobs,
            sequences,
            next_id: AtomicU64::new(max_id + 1),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Allocate a fresh entity id
    pub fn next_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Id the next `next_id` call will return
    pub fn peek_next_id(&self) -> EntityId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Handle for a new entity. Nothing is written until it gets data.
    pub fn create_entity(&self) -> Entity<'_> {
        Entity::new(self, self.next_id())
    }

    /// Handle for an existing id
    pub fn entity(&self, id: EntityId) -> Entity<'_> {
        Entity::new(self, id)
    }

    pub async fn tags(&self) -> RwLockReadGuard<'_, TagIndex> {
        self.tags.read().await
    }

    pub async fn tags_mut(&self) -> RwLockWriteGuard<'_, TagIndex> {
        self.tags.write().await
    }

    pub async fn props(&self) -> RwLockReadGuard<'_, PropIndex> {
        self.props.read().await
    }

    pub async fn props_mut(&self) -> RwLockWriteGuard<'_, PropIndex> {
        self.props.write().await
    }

    pub async fn rels(&self) -> RwLockReadGuard<'_, RelIndex> {
        self.rels.read().await
    }

    pub async fn rels_mut(&self) -> RwLockWriteGuard<'_, RelIndex> {
        self.rels.write().await
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn sequences(&self) -> &Sequences {
        &self.sequences
    }

    /// Every id known to any store
    pub async fn all_ids(&self) -> IdSet {
        let mut ids = self.tags.read().await.get_all_ids().clone();
        ids.extend(self.props.read().await.get_all_ids());
        ids.extend(self.rels.read().await.get_all_ids());
        ids.extend(self.blobs.ids());
        ids.extend(self.history.get_all_ids());
        ids
    }

    /// Run a query and return the matching ids in ascending order
    pub async fn search(&self, query: &str, options: &SearchOptions) -> QueryResult<Vec<EntityId>> {
        let tags = self.tags.read().await;
        let props = self.props.read().await;
        let rels = self.rels.read().await;

        let ctx = SearchContext::new(&tags, &props, &rels)
            .with_extra_ids(self.blobs.ids().into_iter().chain(self.history.get_all_ids()));
        search(&ctx, query, options)
    }

    pub async fn stats(&self) -> StoreStats {
        let index = {
            let tags = self.tags.read().await;
            let props = self.props.read().await;
            let rels = self.rels.read().await;
            IndexStats {
                tagged: tags.get_all_ids().len(),
                tags: tags.tag_count(),
                with_props: props.get_all_ids().len(),
                related: rels.get_all_ids().len(),
                words: props.contains_index().map_or(0, |c| c.word_count()),
            }
        };

        StoreStats {
            next_id: self.peek_next_id(),
            entities: self.all_ids().await.len(),
            index,
            blobs: self.blobs.ids().len(),
            history: self.history.get_all_ids().len(),
        }
    }

    /// Flush every log.
    ///
    /// The index locks are released before any I/O, so a log stuck retrying
    /// never blocks mutations or searches. Every store is flushed even if
    /// another fails; the first error is returned.
    pub async fn flush(&self) -> StoreResult<()> {
        let tags = self.tags.read().await.writer();
        let props = self.props.read().await.writer();
        let rels = self.rels.read().await.writer();

        let results = tokio::join!(
            tags.flush(),
            props.flush(),
            rels.flush(),
            self.history.flush(),
            self.blobs.flush(),
            self.sequences.flush(),
        );
        let results = [results.0, results.1, results.2, results.3, results.4, results.5];

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                tracing::error!("Flush failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Flush and release the store
    pub async fn close(self) -> StoreResult<()> {
        self.flush().await?;
        tracing::info!("Closed entity store at {:?}", self.config.data_dir);
        Ok(())
    }
}
