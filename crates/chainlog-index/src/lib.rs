//! chainlog Secondary Indexing
//!
//! Inverted indexes and filter evaluation on top of the chainlog storage
//! engine. User-supplied indexing functions map blocks to opaque string
//! values with payload positions; the indexer persists them as roaring
//! bitmaps of `(block << 16) | position` compound keys, one bitmap file per
//! `(index, value)` pair, with a durable per-index watermark.
//!
//! ```text
//! IndexedWriter.write(block)
//!     Indexer.index(block)     <- runs every IndexFn, merges updates
//!     Writer.write(block)
//!     ... roll: Indexer.flush() then segment seal (wrapped roll policy)
//!
//! FilterBuilder.eq("only_even", "true")     -> Filter
//!     .eval() -> IndexIterator over (block, position)
//! FilteredReader(reader, filter).read()     -> narrowed Block<T>
//! ```

pub mod compound;
pub mod error;
pub mod filter;
pub mod filterable;
pub mod index;
pub mod index_file;
pub mod indexer;
pub mod reader_with_filter;
pub mod writer_with_indexer;

pub use compound::{CompoundKey, IndexName, IndexedValue, POSITION_ALL};
pub use error::{Error, Result};
pub use filter::{Filter, FilterBuilder, FilterBuilderOptions, IndexIterator};
pub use filterable::Filterable;
pub use index::{indexes_from, Index, IndexFn, IndexUpdate, Indexes};
pub use index_file::IndexFile;
pub use indexer::{Indexer, IndexerOptions, INDEXES_DIR};
pub use reader_with_filter::FilteredReader;
pub use writer_with_indexer::IndexedWriter;
