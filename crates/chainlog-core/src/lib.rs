//! chainlog Core
//!
//! Core data model and byte-stream plumbing shared by the chainlog storage and
//! index crates:
//!
//! - [`Block`]: the payload envelope appended to a dataset
//! - [`Codec`] / [`Encode`] / [`Decode`]: pluggable block serialization
//!   (CBOR by default, JSON lines as an alternative)
//! - [`Compression`]: streaming segment compression (ZSTD or none)
//!
//! Nothing here touches a filesystem; the storage crate wires these pieces
//! onto segments.

pub mod block;
pub mod codec;
pub mod compression;
pub mod error;

pub use block::{Block, BlockHash, Blocks};
pub use codec::{CborCodec, Codec, Decode, Encode, JsonCodec};
pub use compression::{Compression, CompressorSink, ZSTD_LEVEL};
pub use error::{Error, Result};
