//! Named Indexes
//!
//! An [`Index`] pairs a normalized name with a user-supplied indexing
//! function. The function inspects a block and emits, per indexed value, the
//! payload positions carrying it; returning `None` skips the block entirely
//! (its height still advances the watermark, so it is never revisited).
//!
//! Indexing is idempotent by watermark: `index_block` refuses blocks at or
//! below the index's durable watermark, and `store` advances the watermark
//! only after every bitmap write of a batch has landed. A crash between
//! bitmap writes and the watermark write causes redundant re-indexing on
//! restart, which the bitmap OR absorbs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use object_store::ObjectStore;
use roaring::RoaringTreemap;
use tokio::sync::OnceCell;

use chainlog_core::Block;

use crate::compound::{CompoundKey, IndexName, IndexedValue};
use crate::error::{Error, Result};
use crate::index_file::{read_watermark, write_watermark, IndexFile};

/// Emits the indexed values of one block, mapped to the payload positions
/// they occur at. `Ok(None)` means "do not index this block".
pub type IndexFn<T> = Arc<
    dyn Fn(&Block<T>) -> std::result::Result<Option<HashMap<IndexedValue, Vec<u16>>>, String>
        + Send
        + Sync,
>;

/// The indexes registered for a dataset.
pub type Indexes<T> = HashMap<IndexName, Index<T>>;

/// In-memory accumulation of index additions across a batch of blocks.
#[derive(Default)]
pub struct IndexUpdate {
    /// Per-value compound-key bitmaps added this batch; these are persisted.
    pub block_bitmaps: HashMap<IndexedValue, RoaringTreemap>,

    /// Highest block number observed.
    pub last_block: u64,
}

impl IndexUpdate {
    /// An update that only advances the height (block skipped by the
    /// indexing function).
    pub fn advance(last_block: u64) -> Self {
        Self {
            last_block,
            ..Default::default()
        }
    }

    /// Per-value bitmap OR, max on the height.
    pub fn merge(&mut self, other: IndexUpdate) {
        for (value, bitmap) in other.block_bitmaps {
            *self.block_bitmaps.entry(value).or_default() |= bitmap;
        }
        self.last_block = self.last_block.max(other.last_block);
    }

    /// Serialized size of the accumulated bitmaps.
    pub fn estimated_size(&self) -> u64 {
        self.block_bitmaps
            .values()
            .map(|b| b.serialized_size() as u64)
            .sum()
    }
}

pub struct Index<T> {
    name: IndexName,
    func: IndexFn<T>,
    // lazily loaded cache of the durable watermark
    watermark: OnceCell<AtomicU64>,
}

impl<T> Index<T> {
    pub fn new(name: impl Into<IndexName>, func: IndexFn<T>) -> Self {
        Self {
            name: name.into(),
            func,
            watermark: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &IndexName {
        &self.name
    }

    /// Fetch the persisted bitmap for a value (empty if absent).
    pub async fn fetch(
        &self,
        fs: &Arc<dyn ObjectStore>,
        value: &IndexedValue,
    ) -> Result<RoaringTreemap> {
        IndexFile::new(Arc::clone(fs), &self.name, value).read().await
    }

    /// Run the indexing function over one block. With a filesystem supplied,
    /// blocks at or below the durable watermark produce no update.
    pub async fn index_block(
        &self,
        fs: Option<&Arc<dyn ObjectStore>>,
        block: &Block<T>,
    ) -> Result<Option<IndexUpdate>> {
        if let Some(fs) = fs {
            if block.number <= self.last_block_indexed(fs).await? {
                return Ok(None);
            }
        }

        let Some(values) = (self.func)(block).map_err(|reason| Error::IndexFn {
            block: block.number,
            reason,
        })?
        else {
            return Ok(Some(IndexUpdate::advance(block.number)));
        };

        let mut update = IndexUpdate::advance(block.number);
        for (value, positions) in values {
            let keys = update.block_bitmaps.entry(value).or_default();
            for position in positions {
                keys.insert(CompoundKey::new(block.number, position).into());
            }
        }
        Ok(Some(update))
    }

    /// Payload positions this index would emit for `value` on `block`.
    /// Pure - no filesystem, no watermark. Used by filter narrowing.
    pub fn positions_for(&self, block: &Block<T>, value: &IndexedValue) -> RoaringTreemap {
        let mut bitmap = RoaringTreemap::new();
        if let Ok(Some(values)) = (self.func)(block) {
            if let Some(positions) = values.get(value) {
                for &position in positions {
                    bitmap.insert(position as u64);
                }
            }
        }
        bitmap
    }

    /// Read-modify-write every non-empty bitmap of the update, then advance
    /// the watermark. A batch at or below the watermark is a no-op.
    pub async fn store(&self, fs: &Arc<dyn ObjectStore>, update: &IndexUpdate) -> Result<()> {
        if self.last_block_indexed(fs).await? >= update.last_block {
            return Ok(());
        }

        for (value, additions) in &update.block_bitmaps {
            if additions.is_empty() {
                continue;
            }
            let file = IndexFile::new(Arc::clone(fs), &self.name, value);
            let mut merged = file.read().await?;
            merged |= additions;
            file.write(&merged).await?;
        }

        // watermark strictly after the bitmap writes
        self.set_last_block_indexed(fs, update.last_block).await?;

        tracing::debug!(
            index = %self.name,
            last_block = update.last_block,
            values = update.block_bitmaps.len(),
            "stored index batch"
        );
        Ok(())
    }

    /// The highest durably indexed block number (0 if nothing yet). Cached
    /// in memory after the first load.
    pub async fn last_block_indexed(&self, fs: &Arc<dyn ObjectStore>) -> Result<u64> {
        let cell = self
            .watermark
            .get_or_try_init(|| async {
                read_watermark(fs, &self.name).await.map(AtomicU64::new)
            })
            .await?;
        Ok(cell.load(Ordering::Acquire))
    }

    async fn set_last_block_indexed(
        &self,
        fs: &Arc<dyn ObjectStore>,
        block_num: u64,
    ) -> Result<()> {
        if self.last_block_indexed(fs).await? >= block_num {
            return Ok(());
        }
        write_watermark(fs, &self.name, block_num).await?;
        if let Some(cell) = self.watermark.get() {
            cell.store(block_num, Ordering::Release);
        }
        Ok(())
    }
}

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        // the watermark cache reloads lazily on the clone
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
            watermark: OnceCell::new(),
        }
    }
}

/// Build an [`Indexes`] map from `(name, function)` pairs.
pub fn indexes_from<T>(entries: impl IntoIterator<Item = (IndexName, IndexFn<T>)>) -> Indexes<T> {
    entries
        .into_iter()
        .map(|(name, func)| (name.clone(), Index::new(name, func)))
        .collect()
}
