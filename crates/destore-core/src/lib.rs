//! Core types for DEStore.
//!
//! This crate holds the pure, synchronous pieces of the store:
//!
//! - **Routing**: the deterministic map from `(uid, created_at, n_bits)` to a
//!   shard location. No I/O, no state.
//! - **Compression**: the codec adapter (none / zstd / lz4) and the
//!   configuration driving the writer's skip heuristic.
//! - **Shard format**: encode/decode for the `[HEADER | DATA | INDEX | FOOTER]`
//!   container layout, including the v2 BigFile index entries.
//!
//! Everything that touches a back-end (range reads, uploads, caching) lives in
//! `destore-storage`; this crate can be used to inspect or produce shard bytes
//! entirely in memory.

pub mod compression;
pub mod error;
pub mod routing;
pub mod shard;

pub use compression::{Codec, CompressionConfig};
pub use error::{Error, Result};
pub use routing::{locate, ShardLocation};
pub use shard::{EntryPayload, IndexEntry, ShardIndex};
