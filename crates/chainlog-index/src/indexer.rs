//! The Indexer
//!
//! `Indexer` maintains every registered index for a dataset. `index` runs all
//! indexing functions over a block and merges the results into per-index
//! in-memory accumulators; `flush` persists all accumulators concurrently
//! (bounded fan-out, first error wins) and clears them.
//!
//! Indexes live under `<dataset>/.indexes/` on the dataset's filesystem.
//! Each index is self-consistent against its own watermark, so no
//! cross-index transaction is needed: a crash mid-flush leaves some indexes
//! ahead of others, and the watermark check absorbs the replay.
//!
//! Composed with a writer (see `IndexedWriter`), the indexer doubles as the
//! writer's roll hook: every segment seal flushes the indexes first, keeping
//! them aligned with the catalog.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::ObjectStore;
use tokio::sync::Mutex;

use chainlog_core::Block;
use chainlog_storage::{local_store, Dataset, Prefixed, RollHook};

use crate::compound::IndexName;
use crate::error::Result;
use crate::index::{IndexUpdate, Indexes};

/// Directory holding all indexes, relative to the dataset root.
pub const INDEXES_DIR: &str = ".indexes";

/// Concurrent per-index stores during a flush.
const FLUSH_CONCURRENCY: usize = 8;

pub struct IndexerOptions<T> {
    pub dataset: Dataset,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub indexes: Indexes<T>,
}

/// Mount `<dataset>/.indexes/` on the configured filesystem.
pub(crate) fn indexes_store(
    dataset: &Dataset,
    store: &Option<Arc<dyn ObjectStore>>,
) -> Result<Arc<dyn ObjectStore>> {
    match store {
        Some(store) => {
            let prefix = format!("{}/{}", dataset.full_path(), INDEXES_DIR);
            Ok(Arc::new(Prefixed::new(Arc::clone(store), prefix)))
        }
        None => {
            let mut root = std::path::PathBuf::from(&dataset.path);
            if !dataset.name.is_empty() {
                root.push(&dataset.name);
            }
            if !dataset.version.is_empty() {
                root.push(&dataset.version);
            }
            root.push(INDEXES_DIR);
            Ok(local_store(&root)?)
        }
    }
}

pub struct Indexer<T> {
    fs: Arc<dyn ObjectStore>,
    indexes: Indexes<T>,
    updates: Mutex<HashMap<IndexName, IndexUpdate>>,
}

impl<T> Indexer<T> {
    /// Open the indexer, seeding each accumulator from its index's durable
    /// watermark.
    pub async fn open(options: IndexerOptions<T>) -> Result<Self> {
        let fs = indexes_store(&options.dataset, &options.store)?;

        let mut updates = HashMap::new();
        for (name, index) in &options.indexes {
            let last_block = index.last_block_indexed(&fs).await?;
            updates.insert(name.clone(), IndexUpdate::advance(last_block));
        }

        Ok(Self {
            fs,
            indexes: options.indexes,
            updates: Mutex::new(updates),
        })
    }

    /// Run every index over the block, merging results into the in-memory
    /// accumulators. Idempotent: already-indexed heights are skipped.
    pub async fn index(&self, block: &Block<T>) -> Result<()> {
        for (name, index) in &self.indexes {
            let Some(update) = index.index_block(Some(&self.fs), block).await? else {
                continue;
            };
            let mut updates = self.updates.lock().await;
            updates.entry(name.clone()).or_default().merge(update);
        }
        Ok(())
    }

    /// Persist all accumulated updates, clearing them on success. Per-index
    /// stores run concurrently; the first failure cancels the rest.
    pub async fn flush(&self) -> Result<()> {
        let mut updates = self.updates.lock().await;

        {
            let jobs: Vec<_> = self
                .indexes
                .values()
                .filter_map(|index| updates.get(index.name()).map(|update| (index, update)))
                .collect();

            // bounded fan-out; the first error cancels the in-flight rest
            futures::stream::iter(jobs)
                .map(|(index, update)| index.store(&self.fs, update))
                .buffer_unordered(FLUSH_CONCURRENCY)
                .try_collect::<Vec<()>>()
                .await?;
        }

        // clear the accumulated bitmaps, keep the heights
        for update in updates.values_mut() {
            update.block_bitmaps.clear();
        }
        Ok(())
    }

    /// Lowest height any index has reached (0 when nothing is indexed).
    /// The safe resume point for feeding the indexer.
    pub async fn block_num(&self) -> u64 {
        let updates = self.updates.lock().await;
        updates
            .values()
            .map(|update| update.last_block)
            .min()
            .unwrap_or(0)
    }

    /// Serialized size of everything waiting to be flushed; callers use this
    /// for memory-pressure flush decisions.
    pub async fn estimated_batch_size(&self) -> u64 {
        let updates = self.updates.lock().await;
        updates.values().map(|update| update.estimated_size()).sum()
    }

    pub async fn close(&self) -> Result<()> {
        self.flush().await
    }

    pub fn file_system(&self) -> &Arc<dyn ObjectStore> {
        &self.fs
    }

    pub(crate) fn indexes(&self) -> &Indexes<T> {
        &self.indexes
    }
}

#[async_trait(?Send)]
impl<T: Send + Sync> RollHook for Indexer<T> {
    async fn on_roll(&self) {
        if let Err(err) = self.flush().await {
            tracing::error!(error = %err, "failed to flush indexes on segment roll");
        }
    }
}
