//! DEStore Storage Layer
//!
//! This crate is the I/O half of the store. It packs manifests of small files
//! into shard containers on a back-end (local filesystem or S3-compatible
//! object storage) and serves individual files back with at most three range
//! reads.
//!
//! ## Write path
//!
//! ```text
//! manifest ──► planner ──► groups by (date_dir, shard_hex), split by size
//!                  │
//!                  ▼
//!             ShardWriter ──► inline payloads (compressed per entry)
//!                  │     └──► BigFile siblings (content-addressed PUTs)
//!                  ▼
//!             single PUT of [HEADER | DATA | INDEX | FOOTER]
//! ```
//!
//! ## Read path
//!
//! ```text
//! get(uid, created_at)
//!     ├── overlay probe (extended retention copy wins)
//!     ├── router ──► object key
//!     ├── index cache hit? ──► payload range GET only
//!     └── miss ──► footer suffix GET ──► index range GET ──► payload GET
//! ```
//!
//! A multi-zone deployment wraps one retrieval engine per back-end and routes
//! by shard index; zones own disjoint index ranges and fail independently.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod packer;
pub mod planner;
pub mod reader;
pub mod retention;
pub mod retriever;
pub mod retry;
pub mod writer;
pub mod zones;

pub use backend::{Backend, LockMode, ObjectStoreBackend, SuffixRead};
pub use cache::{CacheStats, CachedIndex, IndexCache};
pub use config::{CacheConfig, StoreConfig};
pub use error::{Error, Result};
pub use packer::{pack, PackFailure, PackResult, ShardWriteResult};
pub use planner::{build_pack_plan, estimate_shard_counts, FileToPack, PayloadSource, PlannedShard, ShardKey};
pub use reader::ShardReader;
pub use retention::{ExtendedRetentionManager, RetentionAction, RetentionOutcome};
pub use retriever::{FileStore, ShardRetriever};
pub use retry::RetryPolicy;
pub use writer::{CloseSummary, ShardWriter};
pub use zones::{MultiZoneRetriever, Zone, ZoneRange};
