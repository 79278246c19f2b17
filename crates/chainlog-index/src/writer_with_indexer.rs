//! Indexed Writer
//!
//! Composes a writer with an [`Indexer`] so that ingestion keeps indexes and
//! segments aligned without a cross-component transaction. Two orderings
//! carry the guarantee:
//!
//! - **index before write**: every block updates the indexes first. Indexing
//!   is idempotent under the per-index watermarks, so a crash between the
//!   two steps is repaired by replaying the block.
//! - **flush before seal**: the inner writer's roll policy is wrapped so
//!   every segment seal flushes the indexes first. Indexes may therefore
//!   reference blocks whose segment commits in the same or a later roll,
//!   but never blocks that were not ingested.
//!
//! Opening fails if the writer is ahead of the indexes - that state cannot
//! arise from this composition and would need a manual backfill.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

use chainlog_core::Block;
use chainlog_storage::{BlockWriter, Options, RollHook, WrappedRollPolicy, Writer};

use crate::error::{Error, Result};
use crate::indexer::Indexer;

pub struct IndexedWriter<T> {
    writer: Writer<T>,
    indexer: Arc<Indexer<T>>,
}

impl<T> IndexedWriter<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the inner writer with its roll policy wrapped so every segment
    /// seal flushes the indexes first.
    pub async fn open(mut options: Options<T>, indexer: Arc<Indexer<T>>) -> Result<Self> {
        options.roll_policy = Arc::new(WrappedRollPolicy::new(
            Arc::clone(&options.roll_policy),
            Arc::clone(&indexer) as Arc<dyn RollHook>,
        ));

        let writer = Writer::open(options).await?;

        let writer_at = writer.block_num();
        let indexer_at = indexer.block_num().await;
        if writer_at > indexer_at {
            return Err(Error::WriterAhead {
                writer: writer_at,
                indexer: indexer_at,
            });
        }

        Ok(Self { writer, indexer })
    }

    /// Index the block, then write it. Both sides skip already-seen heights,
    /// so replay after a crash converges.
    pub async fn write(&mut self, block: Block<T>) -> Result<()> {
        self.indexer.index(&block).await?;
        self.writer.write(block).await?;
        Ok(())
    }

    pub async fn roll_file(&mut self) -> Result<()> {
        self.indexer.flush().await?;
        self.writer.roll_file().await?;
        Ok(())
    }

    /// Lowest height both sides have durably reached.
    pub async fn block_num(&self) -> u64 {
        self.writer.block_num().min(self.indexer.block_num().await)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.indexer.close().await?;
        self.writer.close().await?;
        Ok(())
    }

    pub fn file_system(&self) -> &Arc<dyn ObjectStore> {
        self.writer.file_system()
    }

    pub fn indexer(&self) -> &Arc<Indexer<T>> {
        &self.indexer
    }
}

#[async_trait(?Send)]
impl<T> BlockWriter<T> for IndexedWriter<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn write(&mut self, block: Block<T>) -> chainlog_storage::Result<()> {
        IndexedWriter::write(self, block).await.map_err(to_storage)
    }

    async fn roll_file(&mut self) -> chainlog_storage::Result<()> {
        IndexedWriter::roll_file(self).await.map_err(to_storage)
    }

    async fn block_num(&self) -> u64 {
        IndexedWriter::block_num(self).await
    }

    async fn close(&mut self) -> chainlog_storage::Result<()> {
        IndexedWriter::close(self).await.map_err(to_storage)
    }
}

fn to_storage(err: Error) -> chainlog_storage::Error {
    match err {
        Error::Storage(inner) => inner,
        other => chainlog_storage::Error::Corrupt(other.to_string()),
    }
}
