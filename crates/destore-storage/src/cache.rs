//! Index Cache with LRU Eviction
//!
//! Parsing a shard index costs two range reads (footer + index). Keeping the
//! parsed result in memory turns every further read from that shard into a
//! single payload range GET, which is the difference between three round
//! trips and one on a warm path.
//!
//! The cache is keyed by `(backend_id, object_key)` and bounded two ways:
//! entry count and estimated byte footprint. Values are `Arc`-shared and
//! immutable, so a reader holding an index stays valid after the entry is
//! evicted underneath it. An optional TTL bounds staleness for deployments
//! where shards get replaced by a repack.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use destore_core::ShardIndex;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CacheConfig;

/// A parsed index plus the object geometry needed to slice payload ranges.
#[derive(Debug, Clone)]
pub struct CachedIndex {
    pub index: ShardIndex,
    /// Total shard object size in bytes.
    pub object_size: u64,
    /// Absolute offset where the index starts (and the data section ends).
    pub index_start: u64,
}

impl CachedIndex {
    fn estimated_bytes(&self) -> u64 {
        (self.index.estimated_size() + std::mem::size_of::<Self>()) as u64
    }
}

struct Slot {
    value: Arc<CachedIndex>,
    bytes: u64,
    inserted_at: Instant,
}

struct Inner {
    lru: LruCache<(String, String), Slot>,
    current_bytes: u64,
}

/// Bounded LRU of parsed shard indexes.
pub struct IndexCache {
    inner: Mutex<Inner>,
    max_bytes: u64,
    ttl: Option<Duration>,
}

impl IndexCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).unwrap();
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                current_bytes: 0,
            }),
            max_bytes: config.max_bytes,
            ttl: config.ttl_seconds.map(Duration::from_secs),
        }
    }

    /// Look up an index, refreshing its LRU position. Expired entries are
    /// dropped on access.
    pub async fn get(&self, backend_id: &str, object_key: &str) -> Option<Arc<CachedIndex>> {
        let key = (backend_id.to_string(), object_key.to_string());
        let mut inner = self.inner.lock().await;

        if let Some(ttl) = self.ttl {
            if let Some(slot) = inner.lru.peek(&key) {
                if slot.inserted_at.elapsed() > ttl {
                    if let Some(stale) = inner.lru.pop(&key) {
                        inner.current_bytes = inner.current_bytes.saturating_sub(stale.bytes);
                    }
                    tracing::debug!(object_key, "index cache entry expired");
                    return None;
                }
            }
        }

        inner.lru.get(&key).map(|slot| slot.value.clone())
    }

    /// Insert a parsed index, evicting least-recently-used entries until both
    /// bounds hold.
    pub async fn put(&self, backend_id: &str, object_key: &str, value: Arc<CachedIndex>) {
        let bytes = value.estimated_bytes();
        let key = (backend_id.to_string(), object_key.to_string());
        let mut inner = self.inner.lock().await;

        // `push` reports both same-key replacement and capacity eviction, so
        // the byte accounting never leaks a silently dropped slot.
        if let Some((_, evicted)) = inner.lru.push(
            key,
            Slot {
                value,
                bytes,
                inserted_at: Instant::now(),
            },
        ) {
            inner.current_bytes = inner.current_bytes.saturating_sub(evicted.bytes);
        }
        inner.current_bytes += bytes;

        // The LruCache itself enforces the entry bound on put; the byte bound
        // is enforced here.
        while inner.current_bytes > self.max_bytes {
            match inner.lru.pop_lru() {
                Some(((_, evicted_key), slot)) => {
                    inner.current_bytes = inner.current_bytes.saturating_sub(slot.bytes);
                    tracing::debug!(object_key = %evicted_key, "evicted index from cache");
                }
                None => break,
            }
        }
    }

    /// Drop one entry, if present.
    pub async fn invalidate(&self, backend_id: &str, object_key: &str) {
        let key = (backend_id.to_string(), object_key.to_string());
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.lru.pop(&key) {
            inner.current_bytes = inner.current_bytes.saturating_sub(slot.bytes);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.lru.len(),
            bytes: inner.current_bytes,
            max_bytes: self.max_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub max_bytes: u64,
}
