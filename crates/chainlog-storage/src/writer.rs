//! The Writer Engine
//!
//! `Writer` appends blocks to a dataset. Blocks are encoded into an in-memory
//! buffer through the configured codec and compressor; a byte-counting
//! adapter between the two feeds the roll policy, so segment size is measured
//! *after* compression. When the policy fires (or `roll_file` is called), the
//! buffer is sealed:
//!
//! 1. the compressor tail is flushed,
//! 2. the policy's flush hook runs (index flushes piggy-back here),
//! 3. a `SegmentFile{first, last}` entry is appended to the catalog,
//! 4. **the catalog is saved**, and only then
//! 5. the segment bytes are written to the content-addressed path.
//!
//! Saving the catalog first makes the crash window benign: a catalog entry
//! with no segment behind it is dropped on the next load (see `FileIndex`).
//! The alternative order would strand an orphaned, unreachable segment
//! object.
//!
//! Re-writing an already-persisted block number is a silent no-op, which is
//! what makes replay after a crash safe for callers.
//!
//! A `Writer` is single-owner (`&mut self`); share it behind a mutex if two
//! tasks must append. Two writers on the same dataset are undefined: the
//! catalog save is not an atomic compare-and-swap.

use std::io::{self, Write as _};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore;

use chainlog_core::{Block, Encode};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::file::SegmentFile;
use crate::file_index::FileIndex;
use crate::policy::RollPolicy;

/// Writer abstraction implemented by [`Writer`] and its wrappers, so that
/// gap-filling, hash verification and indexing compose in any order.
#[async_trait(?Send)]
pub trait BlockWriter<T: Send>: Send {
    async fn write(&mut self, block: Block<T>) -> Result<()>;

    /// Seal the current buffer into a segment, if it holds any blocks.
    async fn roll_file(&mut self) -> Result<()>;

    /// Last block number accepted (0 = none yet).
    async fn block_num(&self) -> u64;

    async fn close(&mut self) -> Result<()>;
}

/// In-memory segment buffer shared between the writer and its encode
/// pipeline.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub(crate) fn clear(&self) {
        self.take();
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut guard) => guard.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reports post-compression bytes to the roll policy.
struct CountingWriter {
    inner: SharedBuffer,
    policy: Arc<dyn RollPolicy>,
}

impl io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.policy.on_write(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct Writer<T> {
    options: Options<T>,
    fs: Arc<dyn ObjectStore>,
    file_index: FileIndex,
    buffer: SharedBuffer,
    encoder: Option<Box<dyn Encode<T>>>,
    first_block: u64,
    last_block: u64,
}

impl<T: Send + 'static> Writer<T> {
    /// Open (or create) a dataset for appending. Picks up after the last
    /// persisted block; a phantom trailing catalog entry is healed here.
    pub async fn open(options: Options<T>) -> Result<Self> {
        let fs = options.build_store()?;
        let file_index = FileIndex::load(Arc::clone(&fs)).await?;
        let last_block = file_index.last_block();

        tracing::debug!(
            dataset = %options.dataset.full_path(),
            last_block,
            segments = file_index.len(),
            "opened dataset for writing"
        );

        Ok(Self {
            options,
            fs,
            file_index,
            buffer: SharedBuffer::default(),
            encoder: None,
            first_block: last_block + 1,
            last_block,
        })
    }

    /// Append a block. Numbers at or below the last accepted block are
    /// dropped silently.
    pub async fn write(&mut self, block: Block<T>) -> Result<()> {
        if block.number <= self.last_block {
            return Ok(());
        }

        if self.encoder.is_none() || self.options.roll_policy.should_roll() {
            self.roll_file().await?;
        }

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Error::Io(io::Error::other(
                "writer pipeline missing after roll",
            )));
        };
        encoder.encode(&block)?;

        self.last_block = block.number;
        self.options.roll_policy.on_block(block.number);
        Ok(())
    }

    /// Seal the buffer into a segment and start a fresh one. A no-op while
    /// the buffer holds no blocks.
    pub async fn roll_file(&mut self) -> Result<()> {
        if let Some(mut encoder) = self.encoder.take() {
            if self.last_block < self.first_block {
                // nothing buffered; keep the current pipeline
                self.encoder = Some(encoder);
                return Ok(());
            }

            encoder.finish()?;
            drop(encoder);
            let bytes = Bytes::from(self.buffer.take());

            let file = Arc::new(SegmentFile::new(self.first_block, self.last_block));
            self.options.roll_policy.on_flush().await;

            // catalog before segment: a crash in between is healed on the
            // next load, while the reverse order would orphan the segment
            self.file_index.add_file(Arc::clone(&file))?;
            self.file_index.save().await?;
            file.write(&self.fs, bytes).await?;

            tracing::info!(
                first = self.first_block,
                last = self.last_block,
                "sealed segment"
            );
        }

        self.start_segment()
    }

    fn start_segment(&mut self) -> Result<()> {
        self.first_block = self.last_block + 1;
        self.buffer.clear();

        let counted = CountingWriter {
            inner: self.buffer.clone(),
            policy: Arc::clone(&self.options.roll_policy),
        };
        let sink = self
            .options
            .compression
            .wrap_writer(Box::new(counted))?;
        self.encoder = Some(self.options.codec.encoder(sink));
        self.options.roll_policy.reset();
        Ok(())
    }

    /// Last block number accepted (0 = none yet).
    pub fn block_num(&self) -> u64 {
        self.last_block
    }

    /// Close the writer. With `roll_on_close`, buffered blocks are sealed
    /// into a final segment first; otherwise they are discarded.
    pub async fn close(&mut self) -> Result<()> {
        if self.options.roll_on_close && self.last_block >= self.first_block {
            self.roll_file().await?;
        }
        self.encoder = None;
        self.buffer.clear();
        Ok(())
    }

    pub fn options(&self) -> &Options<T> {
        &self.options
    }

    /// The dataset-prefixed filesystem view; wrappers mount their own
    /// sub-trees (e.g. indexes) on this.
    pub fn file_system(&self) -> &Arc<dyn ObjectStore> {
        &self.fs
    }

    pub fn file_index(&self) -> &FileIndex {
        &self.file_index
    }
}

#[async_trait(?Send)]
impl<T: Send + 'static> BlockWriter<T> for Writer<T> {
    async fn write(&mut self, block: Block<T>) -> Result<()> {
        Writer::write(self, block).await
    }

    async fn roll_file(&mut self) -> Result<()> {
        Writer::roll_file(self).await
    }

    async fn block_num(&self) -> u64 {
        Writer::block_num(self)
    }

    async fn close(&mut self) -> Result<()> {
        Writer::close(self).await
    }
}
