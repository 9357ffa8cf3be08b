//! Error types for the core format and routing layer.
//!
//! These map onto the store-wide taxonomy: `InvalidInput` surfaces unchanged
//! to callers, everything else here is a flavor of `ErrCorruptShard` — a shard
//! that cannot be decoded is corrupt regardless of whether the damage is in a
//! magic, a codec id, or the compressed payload.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt shard: {0}")]
    CorruptShard(String),

    #[error("unsupported shard version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown codec id: {0}")]
    UnknownCodec(u8),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),
}

impl Error {
    /// True for every kind that means the shard bytes themselves are bad.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Error::InvalidInput(_) | Error::Compression(_))
    }
}
