//! chainlog Storage Engine
//!
//! This crate implements the segment storage layer of chainlog - the
//! component responsible for appending blocks to compressed, content-addressed
//! segment files and streaming them back.
//!
//! ## Architecture
//!
//! ```text
//! Writer.write(block)
//!     |
//!     v
//! encoder -> [compressor] -> byte counter -> in-memory buffer
//!     |                           |
//!     |                           +--> roll policy (size/interval/time)
//!     v  roll
//! FileIndex.save()  -->  segment bytes at content-addressed path
//!
//! Reader.read()
//!     |
//!     v
//! FileIndex (ordered catalog, binary search)
//!     |
//!     v
//! segment bytes -> [decompressor] -> decoder -> Block<T>
//!          \-> background prefetch of the next segment
//! ```
//!
//! The filesystem seam is `Arc<dyn ObjectStore>` (local disk by default;
//! any object-store backend, or in-memory for tests). All on-disk formats
//! are fixed: ZSTD-compressed CBOR for the catalog, codec-framed (optionally
//! ZSTD-compressed) block streams for segments.
//!
//! Wrapping writers add gap-filling ([`NoGapWriter`]) and parent-chain
//! validation ([`VerifyHashWriter`]) on top of the same [`BlockWriter`]
//! seam the core [`Writer`] implements.

pub mod config;
pub mod error;
pub mod file;
pub mod file_index;
pub mod fs;
pub mod policy;
pub mod reader;
pub mod writer;
pub mod writer_no_gap;
pub mod writer_verify;

pub use config::{Dataset, Options, DEFAULT_MAX_SEGMENT_SIZE, DEFAULT_PREFETCH_TIMEOUT};
pub use error::{Error, Result};
pub use file::SegmentFile;
pub use file_index::{FileIndex, FILE_INDEX_PATH};
pub use fs::{local_store, CachedStore, Prefixed};
pub use policy::{
    BlockIntervalRollPolicy, CompositeRollPolicy, RollHook, RollPolicy, SizeRollPolicy,
    TimeRollPolicy, WrappedRollPolicy,
};
pub use reader::{BlockReader, Reader};
pub use writer::{BlockWriter, Writer};
pub use writer_no_gap::NoGapWriter;
pub use writer_verify::{BlockHashLookup, ReaderHashLookup, VerifyHashWriter};
