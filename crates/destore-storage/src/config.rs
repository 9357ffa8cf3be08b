//! Store Configuration
//!
//! One struct carries every knob the core honors: routing width, shard size
//! cap, BigFile threshold, the reserved prefixes, compression selection, the
//! index cache bounds, and the read retry policy.
//!
//! ## Usage
//!
//! ```ignore
//! use destore_storage::StoreConfig;
//!
//! // Archive profile: wide routing, aggressive compression
//! let config = StoreConfig {
//!     n_bits: 12,
//!     compression: destore_core::CompressionConfig::aggressive(),
//!     ..Default::default()
//! };
//! ```

use destore_core::CompressionConfig;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Routing bits: 2^n_bits shards per calendar day (default: 8).
    #[serde(default = "default_n_bits")]
    pub n_bits: u8,

    /// Roll to a split shard past this many bytes (default: 1 GiB).
    #[serde(default = "default_max_shard_size")]
    pub max_shard_size_bytes: u64,

    /// Payloads at or above this size become BigFile siblings (default: 10 MiB).
    #[serde(default = "default_bigfile_threshold")]
    pub bigfile_threshold_bytes: u64,

    /// Key prefix for BigFile siblings (default: `_bigFiles`).
    #[serde(default = "default_bigfiles_prefix")]
    pub bigfiles_prefix: String,

    /// Key prefix for extended-retention overlay copies (default: `_ext_retention`).
    #[serde(default = "default_overlay_prefix")]
    pub overlay_prefix: String,

    /// Per-entry compression selection and skip heuristic.
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Index cache bounds.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Backoff for idempotent back-end reads.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            n_bits: default_n_bits(),
            max_shard_size_bytes: default_max_shard_size(),
            bigfile_threshold_bytes: default_bigfile_threshold(),
            bigfiles_prefix: default_bigfiles_prefix(),
            overlay_prefix: default_overlay_prefix(),
            compression: CompressionConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounds for the in-memory index cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached shard indexes (default: 1024).
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Maximum estimated bytes across cached indexes (default: 64 MiB).
    #[serde(default = "default_cache_bytes")]
    pub max_bytes: u64,

    /// Entry time-to-live in seconds; `None` means entries never go stale
    /// (shards are immutable until a repack replaces them).
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            max_bytes: default_cache_bytes(),
            ttl_seconds: None,
        }
    }
}

fn default_n_bits() -> u8 {
    8
}

fn default_max_shard_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_bigfile_threshold() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_bigfiles_prefix() -> String {
    "_bigFiles".to_string()
}

fn default_overlay_prefix() -> String {
    "_ext_retention".to_string()
}

fn default_cache_entries() -> usize {
    1024
}

fn default_cache_bytes() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.n_bits, 8);
        assert_eq!(cfg.max_shard_size_bytes, 1 << 30);
        assert_eq!(cfg.bigfile_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.bigfiles_prefix, "_bigFiles");
        assert_eq!(cfg.overlay_prefix, "_ext_retention");
        assert!(cfg.cache.ttl_seconds.is_none());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"n_bits": 10}"#).unwrap();
        assert_eq!(cfg.n_bits, 10);
        assert_eq!(cfg.bigfiles_prefix, "_bigFiles");
        assert_eq!(cfg.retry.max_attempts, 3);
    }
}
