//! Storage Error Types
//!
//! ## Error Categories
//!
//! ### Probe errors
//! - `Store(NotFound)` / `BlockNotFound`: a lookup probe failed. `Seek` uses
//!   this as its end-of-stream signal; `is_not_found` is the typed predicate
//!   (no string matching on backend messages).
//!
//! ### Corruption
//! - `OutOfRange`: a decoded block number fell outside its segment's declared
//!   range
//! - `Corrupt`: catalog or bitmap bytes that fail to parse
//!
//! ### Validation
//! - `FileAlreadyExists`: catalog append overlapping an existing range
//! - `ParentHashMismatch`: verify-hash writer chain break
//!
//! Codec and compression failures arrive via `Core`; filesystem failures via
//! `Store` / `Io`.

use chainlog_core::BlockHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] chainlog_core::Error),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("file already exists: block {0}")]
    FileAlreadyExists(u64),

    #[error("block {number} is out of segment range {first}-{last}")]
    OutOfRange { number: u64, first: u64, last: u64 },

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("parent hash mismatch, expected {expected}, got {actual}")]
    ParentHashMismatch {
        expected: BlockHash,
        actual: BlockHash,
    },
}

impl Error {
    /// True for probe-style "does not exist" failures, regardless of backend.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Store(object_store::Error::NotFound { .. }) | Error::BlockNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(Error::BlockNotFound(7).is_not_found());
        assert!(Error::Store(object_store::Error::NotFound {
            path: "x".to_string(),
            source: "gone".into(),
        })
        .is_not_found());
        assert!(!Error::Corrupt("bad".to_string()).is_not_found());
    }
}
