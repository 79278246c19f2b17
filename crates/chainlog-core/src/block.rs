//! Block Data Structure
//!
//! This module defines the core `Block<T>` type - the unit of data appended to
//! and read from a chainlog dataset.
//!
//! ## Structure
//! Each block carries:
//! - **hash**: 32-byte hash of the block itself
//! - **parent**: 32-byte hash of the preceding block (zero for the genesis)
//! - **number**: monotonically increasing block height
//! - **timestamp**: unix timestamp (seconds)
//! - **data**: the payload, generic over `T`
//!
//! The store imposes no invariants on `T` beyond "the configured codec can
//! round-trip it"; in practice that means `Serialize + DeserializeOwned`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A 32-byte block hash.
///
/// The zero hash doubles as "unset", e.g. for the parent of the genesis block
/// or a verify-hash writer whose cache has been invalidated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    /// Build a hash from at most 32 bytes, left-padding with zeros.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        let len = bytes.len().min(32);
        out[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        BlockHash(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for BlockHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_str = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHash(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidHash(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(BlockHash(out))
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        BlockHash(bytes)
    }
}

/// A single block in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block<T> {
    pub hash: BlockHash,
    pub parent: BlockHash,
    pub number: u64,
    pub timestamp: u64,
    pub data: T,
}

impl<T> Block<T> {
    pub fn new(hash: BlockHash, parent: BlockHash, number: u64, timestamp: u64, data: T) -> Self {
        Self {
            hash,
            parent,
            number,
            timestamp,
            data,
        }
    }

    /// A block at the given height with zero hashes and a default payload.
    /// Used by the gap-filling writer to synthesize missing heights.
    pub fn empty(number: u64) -> Self
    where
        T: Default,
    {
        Self {
            hash: BlockHash::ZERO,
            parent: BlockHash::ZERO,
            number,
            timestamp: 0,
            data: T::default(),
        }
    }
}

pub type Blocks<T> = Vec<Block<T>>;
