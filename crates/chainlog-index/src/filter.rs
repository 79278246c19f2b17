//! Filter Construction and Evaluation
//!
//! A [`Filter`] is a lazy boolean expression over indexed values: `eq` leaves
//! fetch one value's bitmap, `and`/`or` combine children. Nothing touches the
//! filesystem until `eval`, which produces an [`IndexIterator`] over compound
//! keys in ascending order (block-major, then position).
//!
//! Missing indexes, missing values and fetch failures all evaluate to an
//! empty bitmap. That silent degradation is deliberate: a filter over an
//! unknown index means "no matches", and callers that need to distinguish
//! the cases validate their index names up front.
//!
//! Filters also narrow decoded payloads: [`Filter::narrow`] re-runs the
//! leaf index functions against a block and keeps only the payload positions
//! the expression matches (the whole-block sentinel passes the payload
//! through untouched).

use std::iter::Peekable;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use object_store::ObjectStore;
use roaring::RoaringTreemap;

use chainlog_core::Block;
use chainlog_storage::Dataset;

use crate::compound::{CompoundKey, IndexName, IndexedValue, POSITION_ALL};
use crate::error::Result;
use crate::filterable::Filterable;
use crate::index::Indexes;
use crate::indexer::indexes_store;

pub struct FilterBuilderOptions<T> {
    pub dataset: Dataset,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub indexes: Indexes<T>,
}

/// Builds filters bound to a dataset's indexes.
pub struct FilterBuilder<T> {
    ctx: Arc<FilterContext<T>>,
}

struct FilterContext<T> {
    fs: Arc<dyn ObjectStore>,
    indexes: Indexes<T>,
}

impl<T> FilterBuilder<T> {
    pub fn new(options: FilterBuilderOptions<T>) -> Result<Self> {
        let fs = indexes_store(&options.dataset, &options.store)?;
        Ok(Self {
            ctx: Arc::new(FilterContext {
                fs,
                indexes: options.indexes,
            }),
        })
    }

    /// Match blocks carrying `value` under the named index.
    pub fn eq(&self, index: impl Into<IndexName>, value: impl Into<IndexedValue>) -> Filter<T> {
        Filter {
            ctx: Arc::clone(&self.ctx),
            node: FilterNode::Eq {
                index: index.into(),
                value: value.into(),
            },
        }
    }

    /// Conjunction. An empty operand list matches nothing.
    pub fn and(&self, filters: Vec<Filter<T>>) -> Filter<T> {
        Filter {
            ctx: Arc::clone(&self.ctx),
            node: FilterNode::And(filters.into_iter().map(|f| f.node).collect()),
        }
    }

    /// Disjunction. An empty operand list matches nothing.
    pub fn or(&self, filters: Vec<Filter<T>>) -> Filter<T> {
        Filter {
            ctx: Arc::clone(&self.ctx),
            node: FilterNode::Or(filters.into_iter().map(|f| f.node).collect()),
        }
    }
}

enum FilterNode {
    Eq { index: IndexName, value: IndexedValue },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

/// A lazy filter expression. Cheap to clone and move around; evaluation
/// fetches bitmaps on demand.
pub struct Filter<T> {
    ctx: Arc<FilterContext<T>>,
    node: FilterNode,
}

impl<T> Filter<T> {
    /// Evaluate to an iterator over matching `(block, position)` pairs.
    pub async fn eval(&self) -> Result<IndexIterator> {
        let bitmap = eval_node(&self.ctx, &self.node).await?;
        Ok(IndexIterator::new(bitmap))
    }

    /// Payload positions of `block` matched by this expression. Runs the
    /// leaf index functions directly; no filesystem access.
    pub fn positions(&self, block: &Block<T>) -> RoaringTreemap {
        positions_node(&self.ctx, &self.node, block)
    }

    /// Narrow a decoded block's payload to the matched positions. Sequence
    /// payloads are rebuilt from the listed positions; the whole-block
    /// sentinel returns the block unmodified.
    pub fn narrow(&self, block: Block<T>) -> Block<T>
    where
        T: Filterable,
    {
        let matched = self.positions(&block);
        if matched.len() == 1 && matched.contains(POSITION_ALL as u64) {
            return block;
        }
        let positions: Vec<u16> = matched.iter().map(|p| p as u16).collect();
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
    }
}

fn eval_node<'a, T>(
    ctx: &'a FilterContext<T>,
    node: &'a FilterNode,
) -> BoxFuture<'a, Result<RoaringTreemap>> {
    async move {
        match node {
            FilterNode::Eq { index, value } => {
                let Some(idx) = ctx.indexes.get(index) else {
                    tracing::debug!(index = %index, "filter over unknown index");
                    return Ok(RoaringTreemap::new());
                };
                match idx.fetch(&ctx.fs, value).await {
                    Ok(bitmap) => Ok(bitmap),
                    Err(err) => {
                        tracing::debug!(index = %index, value = %value, error = %err,
                            "bitmap fetch failed, treating as empty");
                        Ok(RoaringTreemap::new())
                    }
                }
            }
            FilterNode::And(children) => {
                let mut result: Option<RoaringTreemap> = None;
                for child in children {
                    let bitmap = eval_node(ctx, child).await?;
                    result = Some(match result {
                        None => bitmap,
                        Some(mut acc) => {
                            acc &= bitmap;
                            acc
                        }
                    });
                }
                Ok(result.unwrap_or_default())
            }
            FilterNode::Or(children) => {
                let mut result = RoaringTreemap::new();
                for child in children {
                    result |= eval_node(ctx, child).await?;
                }
                Ok(result)
            }
        }
    }
    .boxed()
}

fn positions_node<T>(
    ctx: &FilterContext<T>,
    node: &FilterNode,
    block: &Block<T>,
) -> RoaringTreemap {
    match node {
        FilterNode::Eq { index, value } => match ctx.indexes.get(index) {
            Some(idx) => idx.positions_for(block, value),
            None => RoaringTreemap::new(),
        },
        FilterNode::And(children) => {
            let mut result: Option<RoaringTreemap> = None;
            for child in children {
                let bitmap = positions_node(ctx, child, block);
                result = Some(match result {
                    None => bitmap,
                    Some(mut acc) => {
                        acc &= bitmap;
                        acc
                    }
                });
            }
            result.unwrap_or_default()
        }
        FilterNode::Or(children) => {
            let mut result = RoaringTreemap::new();
            for child in children {
                result |= positions_node(ctx, child, block);
            }
            result
        }
    }
}

/// Iterates a compound-key bitmap in ascending order with one-step lookahead.
pub struct IndexIterator {
    bitmap: RoaringTreemap,
    cursor: Peekable<roaring::treemap::IntoIter>,
}

impl IndexIterator {
    pub fn new(bitmap: RoaringTreemap) -> Self {
        let cursor = bitmap.clone().into_iter().peekable();
        Self { bitmap, cursor }
    }

    pub fn has_next(&mut self) -> bool {
        self.cursor.peek().is_some()
    }

    pub fn next(&mut self) -> Option<(u64, u16)> {
        self.cursor.next().map(|raw| CompoundKey::from(raw).split())
    }

    pub fn peek(&mut self) -> Option<(u64, u16)> {
        self.cursor.peek().map(|&raw| CompoundKey::from(raw).split())
    }

    /// The full result bitmap backing this iterator.
    pub fn bitmap(&self) -> &RoaringTreemap {
        &self.bitmap
    }

    /// Rewind to the first entry.
    pub fn reset(&mut self) {
        self.cursor = self.bitmap.clone().into_iter().peekable();
    }

    /// Position on the last entry, so `next` returns it.
    pub fn reset_to_last(&mut self) {
        self.reset();
        let Some(last) = self.bitmap.max() else {
            return;
        };
        while matches!(self.cursor.peek(), Some(&raw) if raw != last) {
            self.cursor.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(u64, u16)]) -> RoaringTreemap {
        pairs
            .iter()
            .map(|&(block, pos)| u64::from(CompoundKey::new(block, pos)))
            .collect()
    }

    #[test]
    fn test_iterator_ascending_with_peek() {
        let mut iter = IndexIterator::new(keys(&[(2, 0), (1, 1), (1, 0), (3, 5)]));

        assert!(iter.has_next());
        assert_eq!(iter.peek(), Some((1, 0)));
        assert_eq!(iter.next(), Some((1, 0)));
        assert_eq!(iter.next(), Some((1, 1)));
        assert_eq!(iter.peek(), Some((2, 0)));
        assert_eq!(iter.next(), Some((2, 0)));
        assert_eq!(iter.next(), Some((3, 5)));
        assert!(!iter.has_next());
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_iterator_reset() {
        let mut iter = IndexIterator::new(keys(&[(1, 0), (2, 0)]));
        iter.next();
        iter.next();
        assert!(!iter.has_next());

        iter.reset();
        assert_eq!(iter.next(), Some((1, 0)));
    }

    #[test]
    fn test_iterator_reset_to_last() {
        let mut iter = IndexIterator::new(keys(&[(1, 0), (2, 0), (9, 3)]));
        iter.reset_to_last();
        assert_eq!(iter.next(), Some((9, 3)));
        assert!(!iter.has_next());

        let mut empty = IndexIterator::new(RoaringTreemap::new());
        empty.reset_to_last();
        assert!(!empty.has_next());
    }

    #[test]
    fn test_iterator_bitmap_accessor() {
        let bitmap = keys(&[(1, 0)]);
        let iter = IndexIterator::new(bitmap.clone());
        assert_eq!(iter.bitmap(), &bitmap);
    }
}
