//! Single-zone retrieval engine.
//!
//! Fulfills `get(uid, created_at)` against one back-end:
//!
//! 1. **Overlay probe** — if an extended-retention copy exists at the overlay
//!    key, it is the authoritative payload and short-circuits the shard read.
//! 2. **Route** — the pure router yields `(date_dir, shard_hex)`.
//! 3. **Resolve the shard object** — the base key `<date>/<hex>.des` is
//!    checked first; when a group was split at pack time the engine probes
//!    `<date>/<hex>_0000.des`, `_0001.des`, … until the first absent key.
//!    When the base form exists it is the only shard for that key.
//! 4. **Read** — cached index if warm (one payload GET), otherwise the full
//!    three-range protocol, caching the parsed index for the next read.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use destore_core::routing;

use crate::backend::Backend;
use crate::cache::{CachedIndex, IndexCache};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::planner::ShardKey;
use crate::reader::ShardReader;
use crate::retention::overlay_key;
use crate::retry::RetryPolicy;

/// Upper bound on split-suffix probing; pack runs keep split counts tiny and
/// this only guards against a pathological key space.
const MAX_SPLIT_PROBE: usize = 10_000;

/// Read-side surface of the store, implemented by the single-zone engine and
/// the multi-zone dispatcher.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Full read path, overlay included.
    async fn get_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes>;

    /// Index-only membership probe; does not fetch payload bytes.
    async fn has_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<bool>;

    /// Shard read bypassing the overlay probe. Used by the retention manager
    /// when it copies a payload out of its shard.
    async fn read_from_shard(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes>;
}

enum Lookup<T> {
    Found(T),
    UidAbsent,
    NoShard,
}

/// Retrieval engine for one back-end.
pub struct ShardRetriever {
    backend: Arc<dyn Backend>,
    reader: ShardReader,
    cache: Arc<IndexCache>,
    n_bits: u8,
    overlay_prefix: Option<String>,
    retry: RetryPolicy,
}

impl ShardRetriever {
    pub fn new(backend: Arc<dyn Backend>, config: &StoreConfig, cache: Arc<IndexCache>) -> Self {
        let reader = ShardReader::new(
            backend.clone(),
            config.bigfiles_prefix.clone(),
            config.retry.clone(),
        );
        Self {
            backend,
            reader,
            cache,
            n_bits: config.n_bits,
            overlay_prefix: Some(config.overlay_prefix.clone()),
            retry: config.retry.clone(),
        }
    }

    /// Skip the overlay probe entirely (deployments without extended
    /// retention).
    pub fn without_overlay(mut self) -> Self {
        self.overlay_prefix = None;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Evict one shard's cached index (tests and repack tooling).
    pub async fn evict_cached_index(&self, object_key: &str) {
        self.cache.invalidate(self.backend.id(), object_key).await;
    }

    async fn overlay_probe(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Option<Bytes>> {
        let Some(prefix) = &self.overlay_prefix else {
            return Ok(None);
        };
        let key = overlay_key(prefix, uid, created_at);
        let present = self
            .retry
            .run("overlay head", || self.backend.exists(&key))
            .await?;
        if !present {
            return Ok(None);
        }
        tracing::debug!(uid, overlay_key = %key, "serving from extended retention overlay");
        let bytes = self
            .retry
            .run("overlay read", || self.backend.get(&key))
            .await?;
        Ok(Some(bytes))
    }

    async fn overlay_exists(&self, uid: &str, created_at: DateTime<Utc>) -> Result<bool> {
        let Some(prefix) = &self.overlay_prefix else {
            return Ok(false);
        };
        let key = overlay_key(prefix, uid, created_at);
        self.retry
            .run("overlay head", || self.backend.exists(&key))
            .await
    }

    /// Load a shard's index through the cache; `None` when the object itself
    /// is absent.
    async fn index_for(&self, object_key: &str) -> Result<Option<Arc<CachedIndex>>> {
        if let Some(cached) = self.cache.get(self.backend.id(), object_key).await {
            return Ok(Some(cached));
        }
        match self.reader.load_index(object_key).await {
            Ok(index) => {
                let index = Arc::new(index);
                self.cache
                    .put(self.backend.id(), object_key, index.clone())
                    .await;
                Ok(Some(index))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn lookup(&self, object_key: &str, uid: &str) -> Result<Lookup<Bytes>> {
        match self.index_for(object_key).await? {
            None => Ok(Lookup::NoShard),
            Some(cached) => match cached.index.get(uid) {
                Some(entry) => {
                    let bytes = self.reader.read_entry(object_key, entry).await?;
                    Ok(Lookup::Found(bytes))
                }
                None => Ok(Lookup::UidAbsent),
            },
        }
    }

    async fn contains(&self, object_key: &str, uid: &str) -> Result<Lookup<()>> {
        match self.index_for(object_key).await? {
            None => Ok(Lookup::NoShard),
            Some(cached) => {
                if cached.index.contains(uid) {
                    Ok(Lookup::Found(()))
                } else {
                    Ok(Lookup::UidAbsent)
                }
            }
        }
    }

    fn not_found(uid: &str, created_at: DateTime<Utc>) -> Error {
        Error::NotFound(format!(
            "uid {uid:?} for {}",
            created_at.format("%Y-%m-%d")
        ))
    }
}

#[async_trait]
impl FileStore for ShardRetriever {
    async fn get_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes> {
        if uid.is_empty() {
            return Err(Error::InvalidInput("uid must not be empty".to_string()));
        }
        if let Some(bytes) = self.overlay_probe(uid, created_at).await? {
            return Ok(bytes);
        }
        self.read_from_shard(uid, created_at).await
    }

    async fn has_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<bool> {
        if uid.is_empty() {
            return Err(Error::InvalidInput("uid must not be empty".to_string()));
        }
        if self.overlay_exists(uid, created_at).await? {
            return Ok(true);
        }

        let loc = routing::locate(uid, created_at, self.n_bits)?;
        let key = ShardKey::new(loc.date_dir, loc.shard_hex);

        match self.contains(&key.base_key(), uid).await? {
            Lookup::Found(()) => return Ok(true),
            Lookup::UidAbsent => return Ok(false),
            Lookup::NoShard => {}
        }
        for split in 0..MAX_SPLIT_PROBE {
            match self.contains(&key.split_key(split), uid).await? {
                Lookup::Found(()) => return Ok(true),
                Lookup::UidAbsent => continue,
                Lookup::NoShard => break,
            }
        }
        Ok(false)
    }

    async fn read_from_shard(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes> {
        let loc = routing::locate(uid, created_at, self.n_bits)?;
        let key = ShardKey::new(loc.date_dir, loc.shard_hex);

        // Base form first: when it exists, it is the only shard for the key.
        match self.lookup(&key.base_key(), uid).await? {
            Lookup::Found(bytes) => return Ok(bytes),
            Lookup::UidAbsent => return Err(Self::not_found(uid, created_at)),
            Lookup::NoShard => {}
        }

        // Split shards: linear probe until the first absent candidate.
        for split in 0..MAX_SPLIT_PROBE {
            match self.lookup(&key.split_key(split), uid).await? {
                Lookup::Found(bytes) => return Ok(bytes),
                Lookup::UidAbsent => continue,
                Lookup::NoShard => break,
            }
        }
        Err(Self::not_found(uid, created_at))
    }
}
