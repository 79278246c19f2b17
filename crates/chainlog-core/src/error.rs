//! Error Types for the chainlog Core
//!
//! Codec and compression failures surface through this enum; the storage and
//! index crates wrap it with their own error types via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid block hash: {0}")]
    InvalidHash(String),
}

pub type Result<T> = std::result::Result<T, Error>;
