//! Gap-Free Writer
//!
//! Upstream sources can skip block heights (empty batches, pruned ranges).
//! `NoGapWriter` guarantees the persisted sequence has no holes: when an
//! incoming block jumps ahead, placeholder blocks with zero hashes and a
//! `T::default()` payload are synthesized for every missing height, in order,
//! before the real block is written.

use std::marker::PhantomData;

use async_trait::async_trait;

use chainlog_core::Block;

use crate::error::Result;
use crate::writer::BlockWriter;

pub struct NoGapWriter<T, W> {
    inner: W,
    last_block: u64,
    _payload: PhantomData<fn(T)>,
}

impl<T, W> NoGapWriter<T, W>
where
    T: Default + Send,
    W: BlockWriter<T>,
{
    /// Wrap a writer, seeding the gap tracker from its last accepted block.
    pub async fn new(inner: W) -> Self {
        let last_block = inner.block_num().await;
        Self {
            inner,
            last_block,
            _payload: PhantomData,
        }
    }

    pub async fn write(&mut self, block: Block<T>) -> Result<()> {
        if block.number <= self.last_block {
            return Ok(());
        }

        for missing in self.last_block + 1..block.number {
            self.inner.write(Block::empty(missing)).await?;
        }

        let number = block.number;
        self.inner.write(block).await?;
        self.last_block = number;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait(?Send)]
impl<T, W> BlockWriter<T> for NoGapWriter<T, W>
where
    T: Default + Send + 'static,
    W: BlockWriter<T>,
{
    async fn write(&mut self, block: Block<T>) -> Result<()> {
        NoGapWriter::write(self, block).await
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
