//! Storage Error Types
//!
//! The storage layer narrows every failure into the store-wide taxonomy:
//!
//! - `InvalidInput` — bad caller input (malformed UID, routing bits out of
//!   range, a retention date in the past, an illegal zone map), surfaced
//!   unchanged
//! - `NotFound` — UID absent from the resolved shard, or object absent
//! - `Shard` — the shard bytes are corrupt (wraps the core format errors)
//! - `Backend` — transport, timeout, throttling; the only retryable kind
//! - `ShardTooLarge` — one append would blow the configured shard size cap

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Shard(destore_core::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("shard too large: appending {uid:?} ({needed} bytes) exceeds max {max}")]
    ShardTooLarge { uid: String, needed: u64, max: u64 },
}

impl Error {
    /// Only transport-level failures are worth retrying; corrupt shards and
    /// missing objects never heal on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Backend(_))
    }

    /// True when the underlying shard bytes could not be decoded.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Shard(_))
    }
}

impl From<destore_core::Error> for Error {
    fn from(e: destore_core::Error) -> Self {
        match e {
            destore_core::Error::InvalidInput(msg) => Error::InvalidInput(msg),
            other => Error::Shard(other),
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path),
            other => Error::Backend(other.to_string()),
        }
    }
}
