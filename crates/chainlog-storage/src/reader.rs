//! The Reader Engine
//!
//! `Reader` streams a dataset's blocks in segment order. Opening is lazy: the
//! first `read` opens segment 0 through the configured decompressor and
//! decoder. When a segment's stream ends the reader advances to the next one
//! and kicks off a background prefetch of the segment after it, so sequential
//! reads overlap decode with the next download.
//!
//! `seek` binary-searches the catalog and swaps the active decoder; the next
//! `read` returns the first persisted block with a number at or above the
//! target. Seeking past the end surfaces the probe error (`is_not_found`) -
//! the reader's end-of-stream signal for positioning.
//!
//! Blocks whose number is at or below the last returned one are skipped,
//! mirroring the writer's tolerance for replayed input. Every decoded block
//! must fall inside its segment's declared range; anything else is corruption
//! and surfaces as `OutOfRange`.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;

use chainlog_core::{Block, Decode};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::file_index::FileIndex;

/// Reader abstraction implemented by [`Reader`] and its wrappers.
#[async_trait(?Send)]
pub trait BlockReader<T: Send>: Send {
    /// Next block, or `Ok(None)` at end of stream.
    async fn read(&mut self) -> Result<Option<Block<T>>>;

    /// Position so the next `read` returns the first block `>= block_num`.
    async fn seek(&mut self, block_num: u64) -> Result<()>;

    /// Last block number returned (0 = none yet).
    async fn block_num(&self) -> u64;

    fn files_num(&self) -> usize;

    async fn close(&mut self) -> Result<()>;
}

pub struct Reader<T> {
    options: Options<T>,
    fs: Arc<dyn ObjectStore>,
    file_index: FileIndex,
    current: usize,
    decoder: Option<Box<dyn Decode<T>>>,
    last_block: Option<u64>,
}

impl<T: Send + 'static> Reader<T> {
    /// Open a dataset for reading. A phantom trailing catalog entry is healed
    /// during the load.
    pub async fn open(options: Options<T>) -> Result<Self> {
        let fs = options.build_store()?;
        let file_index = FileIndex::load(Arc::clone(&fs)).await?;

        tracing::debug!(
            dataset = %options.dataset.full_path(),
            segments = file_index.len(),
            "opened dataset for reading"
        );

        Ok(Self {
            options,
            fs,
            file_index,
            current: 0,
            decoder: None,
            last_block: None,
        })
    }

    pub async fn read(&mut self) -> Result<Option<Block<T>>> {
        if self.decoder.is_none() && !self.open_file(self.current).await? {
            return Ok(None);
        }

        loop {
            let file = &self.file_index.files()[self.current];
            let (first, last) = (file.first_block(), file.last_block());

            let Some(decoder) = self.decoder.as_mut() else {
                return Ok(None);
            };

            match decoder.decode()? {
                Some(block) => {
                    if block.number < first || block.number > last {
                        return Err(Error::OutOfRange {
                            number: block.number,
                            first,
                            last,
                        });
                    }
                    // tolerate writer replays
                    if matches!(self.last_block, Some(seen) if block.number <= seen) {
                        continue;
                    }
                    self.last_block = Some(block.number);
                    return Ok(Some(block));
                }
                None => {
                    if !self.open_file(self.current + 1).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Position so the next `read` returns the first persisted block with
    /// number `>= block_num`. Past the catalog end this fails with the probe
    /// error (`is_not_found`).
    pub async fn seek(&mut self, block_num: u64) -> Result<()> {
        let target = self
            .file_index
            .position_for(block_num)
            .ok_or(Error::BlockNotFound(block_num))?;

        if self.decoder.is_none() || target != self.current {
            // drop the read-ahead for the segment we are abandoning
            if let Some(next) = self.file_index.files().get(self.current + 1) {
                next.prefetch_clear().await;
            }
            self.open_file(target).await?;
        }

        self.last_block = block_num.checked_sub(1);
        Ok(())
    }

    /// Last block number returned (0 = none yet).
    pub fn block_num(&self) -> u64 {
        self.last_block.unwrap_or(0)
    }

    pub fn files_num(&self) -> usize {
        self.file_index.len()
    }

    pub fn file_index(&self) -> &FileIndex {
        &self.file_index
    }

    pub async fn close(&mut self) -> Result<()> {
        self.decoder = None;
        if let Some(next) = self.file_index.files().get(self.current + 1) {
            next.prefetch_clear().await;
        }
        Ok(())
    }

    /// Open the segment at `index` and pipeline a prefetch of the one after.
    /// Returns false past the end of the catalog.
    async fn open_file(&mut self, index: usize) -> Result<bool> {
        let Some(file) = self.file_index.files().get(index) else {
            // leave the exhausted decoder in place so repeated reads at the
            // end of the stream stay cheap
            return Ok(false);
        };

        let bytes = file.open(&self.fs).await?;
        let source = self
            .options
            .compression
            .wrap_reader(Box::new(Cursor::new(bytes)))?;
        self.decoder = Some(self.options.codec.decoder(source));
        self.current = index;

        self.spawn_prefetch(index + 1);
        Ok(true)
    }

    fn spawn_prefetch(&self, index: usize) {
        let Some(file) = self.file_index.files().get(index) else {
            return;
        };
        let file = Arc::clone(file);
        let fs = Arc::clone(&self.fs);
        let deadline = self.options.prefetch_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, file.prefetch(&fs)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!(
                        first = file.first_block(),
                        error = %err,
                        "segment prefetch failed"
                    );
                }
                Err(_) => {
                    tracing::debug!(first = file.first_block(), "segment prefetch timed out");
                }
            }
        });
    }
}

#[async_trait(?Send)]
impl<T: Send + 'static> BlockReader<T> for Reader<T> {
    async fn read(&mut self) -> Result<Option<Block<T>>> {
        Reader::read(self).await
    }

    async fn seek(&mut self, block_num: u64) -> Result<()> {
        Reader::seek(self, block_num).await
    }

    async fn block_num(&self) -> u64 {
        Reader::block_num(self)
    }

    fn files_num(&self) -> usize {
        Reader::files_num(self)
    }

    async fn close(&mut self) -> Result<()> {
        Reader::close(self).await
    }
}
