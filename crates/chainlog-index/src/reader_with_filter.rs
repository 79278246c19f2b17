//! Filtered Reader
//!
//! Wraps a base reader with a filter: `read` walks the filter's index
//! iterator instead of the segment stream, seeking the base reader to each
//! matching block and narrowing its payload to the matched positions.
//!
//! The iterator yields compound keys in ascending order, so all positions of
//! one block are adjacent; `read` drains them in a single pass before
//! touching the base reader. When the position set is exactly the
//! whole-block sentinel the payload passes through unmodified.

use async_trait::async_trait;

use chainlog_core::Block;
use chainlog_storage::BlockReader;

use crate::compound::POSITION_ALL;
use crate::error::{Error, Result};
use crate::filter::{Filter, IndexIterator};
use crate::filterable::Filterable;

pub struct FilteredReader<T, R> {
    reader: R,
    filter: Filter<T>,
    iterator: Option<IndexIterator>,
    last_block: u64,
}

impl<T, R> FilteredReader<T, R>
where
    T: Filterable + Send,
    R: BlockReader<T>,
{
    pub fn new(reader: R, filter: Filter<T>) -> Self {
        Self {
            reader,
            filter,
            iterator: None,
            last_block: 0,
        }
    }

    /// Next matching block with its payload narrowed to the matched
    /// positions, or `Ok(None)` once the filter is exhausted.
    pub async fn read(&mut self) -> Result<Option<Block<T>>> {
        if self.iterator.is_none() {
            self.iterator = Some(self.filter.eval().await?);
        }
        let Some(iterator) = self.iterator.as_mut() else {
            return Ok(None);
        };

        let Some((block_num, position)) = iterator.next() else {
            return Ok(None);
        };

        // drain the remaining positions of this block
        let mut positions = vec![position];
        while let Some((next_block, next_position)) = iterator.peek() {
            if next_block != block_num {
                break;
            }
            iterator.next();
            positions.push(next_position);
        }

        self.reader.seek(block_num).await?;
        let block = self
            .reader
            .read()
            .await?
            .ok_or(Error::Storage(chainlog_storage::Error::BlockNotFound(
                block_num,
            )))?;

        let block = if positions == [POSITION_ALL] {
            block
        } else {
            let Block {
                hash,
                parent,
                number,
                timestamp,
                data,
            } = block;
            Block {
                hash,
                parent,
                number,
                timestamp,
                data: data.retain_positions(&positions),
            }
        };

        self.last_block = block_num;
        Ok(Some(block))
    }

    /// Fast-forward the filter iterator so the next `read` returns the first
    /// matching block with number `>= block_num`. The base reader seek is
    /// deferred to that `read`.
    pub async fn seek(&mut self, block_num: u64) -> Result<()> {
        if self.iterator.is_none() {
            self.iterator = Some(self.filter.eval().await?);
        }
        let Some(iterator) = self.iterator.as_mut() else {
            return Ok(());
        };

        while let Some((next_block, _)) = iterator.peek() {
            if next_block >= block_num {
                break;
            }
            iterator.next();
        }
        Ok(())
    }

    /// Last matching block number returned (0 = none yet).
    pub fn block_num(&self) -> u64 {
        self.last_block
    }

    pub fn files_num(&self) -> usize {
        self.reader.files_num()
    }

    pub async fn close(&mut self) -> Result<()> {
        self.iterator = None;
        self.reader.close().await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl<T, R> BlockReader<T> for FilteredReader<T, R>
where
    T: Filterable + Send + 'static,
    R: BlockReader<T>,
{
    async fn read(&mut self) -> chainlog_storage::Result<Option<Block<T>>> {
        FilteredReader::read(self).await.map_err(|err| match err {
            Error::Storage(inner) => inner,
            other => chainlog_storage::Error::Corrupt(other.to_string()),
        })
    }

    async fn seek(&mut self, block_num: u64) -> chainlog_storage::Result<()> {
        FilteredReader::seek(self, block_num)
            .await
            .map_err(|err| match err {
                Error::Storage(inner) => inner,
                other => chainlog_storage::Error::Corrupt(other.to_string()),
            })
    }

    async fn block_num(&self) -> u64 {
        FilteredReader::block_num(self)
    }

    fn files_num(&self) -> usize {
        FilteredReader::files_num(self)
    }

    async fn close(&mut self) -> chainlog_storage::Result<()> {
        self.iterator = None;
        self.reader.close().await
    }
}
