//! Parent-Hash Verifying Writer
//!
//! `VerifyHashWriter` checks that every written block's `parent` matches the
//! hash of the block before it, failing the write with `ParentHashMismatch`
//! otherwise. The expected hash is cached in memory; on the first write of a
//! session (and after any failure) it is re-fetched through a
//! [`BlockHashLookup`], typically backed by a reader over the same dataset.
//!
//! The cache reset on failure is load-bearing: after a rejected block or a
//! failed inner write, the next attempt re-reads the last *persisted* hash
//! instead of trusting in-memory state that may no longer match disk.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use chainlog_core::{Block, BlockHash};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::writer::BlockWriter;

/// Resolves the hash of an already-persisted block.
#[async_trait]
pub trait BlockHashLookup: Send + Sync {
    async fn hash_at(&self, block_num: u64) -> Result<BlockHash>;
}

/// A [`BlockHashLookup`] that opens a fresh reader over the dataset, seeks to
/// the block and reads its hash.
pub struct ReaderHashLookup<T> {
    options: Options<T>,
}

impl<T> ReaderHashLookup<T> {
    pub fn new(options: Options<T>) -> Self {
        Self { options }
    }
}

#[async_trait]
impl<T> BlockHashLookup for ReaderHashLookup<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn hash_at(&self, block_num: u64) -> Result<BlockHash> {
        let mut reader = Reader::open(self.options.clone()).await?;
        reader.seek(block_num).await?;
        let block = reader
            .read()
            .await?
            .ok_or(Error::BlockNotFound(block_num))?;
        reader.close().await?;
        Ok(block.hash)
    }
}

pub struct VerifyHashWriter<T, W> {
    inner: W,
    lookup: Arc<dyn BlockHashLookup>,
    prev_hash: BlockHash,
    _payload: std::marker::PhantomData<fn(T)>,
}

impl<T, W> VerifyHashWriter<T, W>
where
    T: Send,
    W: BlockWriter<T>,
{
    pub fn new(inner: W, lookup: Arc<dyn BlockHashLookup>) -> Self {
        Self {
            inner,
            lookup,
            prev_hash: BlockHash::ZERO,
            _payload: std::marker::PhantomData,
        }
    }

    pub async fn write(&mut self, block: Block<T>) -> Result<()> {
        // block 1 has no parent to validate
        if block.number != 1 {
            if self.prev_hash.is_zero() {
                self.prev_hash = self.lookup.hash_at(block.number - 1).await?;
            }

            if block.parent != self.prev_hash {
                let expected = std::mem::take(&mut self.prev_hash);
                return Err(Error::ParentHashMismatch {
                    expected,
                    actual: block.parent,
                });
            }
        }

        let hash = block.hash;
        if let Err(err) = self.inner.write(block).await {
            // force a re-fetch of the last persisted hash on retry
            self.prev_hash = BlockHash::ZERO;
            return Err(err);
        }

        self.prev_hash = hash;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait(?Send)]
impl<T, W> BlockWriter<T> for VerifyHashWriter<T, W>
where
    T: Send + 'static,
    W: BlockWriter<T>,
{
    async fn write(&mut self, block: Block<T>) -> Result<()> {
        VerifyHashWriter::write(self, block).await
    }

    async fn roll_file(&mut self) -> Result<()> {
        self.inner.roll_file().await
    }

    async fn block_num(&self) -> u64 {
        self.inner.block_num().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
