//! Index Error Types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] chainlog_storage::Error),

    #[error(transparent)]
    Core(#[from] chainlog_core::Error),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error("index function failed on block {block}: {reason}")]
    IndexFn { block: u64, reason: String },

    #[error("writer is ahead of the indexes (writer at {writer}, indexes at {indexer})")]
    WriterAhead { writer: u64, indexer: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
