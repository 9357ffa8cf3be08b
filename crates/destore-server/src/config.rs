//! Server configuration from environment variables and the zone-map file.
//!
//! All configuration is done via environment variables:
//!
//! - `DESTORE_ADDR`: bind address (default: 0.0.0.0:8080)
//! - `DESTORE_BACKEND`: `local` | `s3` | `multi` (default: local)
//! - `DESTORE_BASE_DIR`: local backend root (default: ./data/destore)
//! - `DESTORE_BUCKET` / `DESTORE_PREFIX`: s3 backend target
//! - `DESTORE_S3_REGION` / `DESTORE_S3_ENDPOINT`: s3 overrides (MinIO etc.)
//! - `DESTORE_ZONES_CONFIG`: zone-map JSON path for the `multi` backend
//! - `DESTORE_N_BITS`: routing bits (default: 8)
//! - `DESTORE_CACHE_ENTRIES` / `DESTORE_CACHE_BYTES`: index cache bounds
//! - `DESTORE_MAX_SHARD_SIZE`, `DESTORE_BIGFILE_THRESHOLD`,
//!   `DESTORE_BIGFILES_PREFIX`, `DESTORE_OVERLAY_PREFIX`: store knobs
//!
//! The zone map is a JSON document:
//!
//! ```json
//! {
//!   "n_bits": 8,
//!   "zones": [
//!     { "name": "a", "range": { "start": 0, "end": 127 },
//!       "backend": { "type": "local", "path": "/data/zone-a" } },
//!     { "name": "b", "range": { "start": 128, "end": 255 },
//!       "backend": { "type": "s3", "bucket": "des-b", "prefix": "cold" } }
//!   ]
//! }
//! ```

use std::sync::Arc;

use destore_storage::{
    Backend, Error, ExtendedRetentionManager, FileStore, IndexCache, MultiZoneRetriever,
    ObjectStoreBackend, Result, ShardRetriever, StoreConfig, Zone, ZoneRange,
};
use serde::Deserialize;

use crate::AppState;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidInput(format!("cannot parse {name}={raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Assemble the [`StoreConfig`] from `DESTORE_*` variables over defaults.
pub fn store_config_from_env() -> Result<StoreConfig> {
    let mut config = StoreConfig::default();
    if let Some(n_bits) = env_parse("DESTORE_N_BITS")? {
        config.n_bits = n_bits;
    }
    if let Some(max) = env_parse("DESTORE_MAX_SHARD_SIZE")? {
        config.max_shard_size_bytes = max;
    }
    if let Some(threshold) = env_parse("DESTORE_BIGFILE_THRESHOLD")? {
        config.bigfile_threshold_bytes = threshold;
    }
    if let Ok(prefix) = std::env::var("DESTORE_BIGFILES_PREFIX") {
        config.bigfiles_prefix = prefix;
    }
    if let Ok(prefix) = std::env::var("DESTORE_OVERLAY_PREFIX") {
        config.overlay_prefix = prefix;
    }
    if let Some(entries) = env_parse("DESTORE_CACHE_ENTRIES")? {
        config.cache.max_entries = entries;
    }
    if let Some(bytes) = env_parse("DESTORE_CACHE_BYTES")? {
        config.cache.max_bytes = bytes;
    }
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct ZonesFile {
    n_bits: u8,
    zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
struct ZoneEntry {
    name: String,
    range: ZoneRange,
    backend: BackendEntry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BackendEntry {
    Local {
        path: String,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl BackendEntry {
    fn build(&self) -> Result<Arc<dyn Backend>> {
        match self {
            BackendEntry::Local { path } => Ok(Arc::new(ObjectStoreBackend::local(path)?)),
            BackendEntry::S3 {
                bucket,
                prefix,
                region,
                endpoint,
            } => Ok(Arc::new(ObjectStoreBackend::s3(
                bucket,
                prefix.as_deref(),
                region.as_deref(),
                endpoint.as_deref(),
            )?)),
        }
    }
}

/// Load and validate a zone map, building one retrieval engine per zone.
/// All zones share a single index cache; entries are keyed by backend id.
pub fn load_zone_map(path: &str, config: &mut StoreConfig) -> Result<MultiZoneRetriever> {
    let raw = std::fs::read(path)
        .map_err(|e| Error::InvalidInput(format!("read zone map {path:?}: {e}")))?;
    let file: ZonesFile = serde_json::from_slice(&raw)
        .map_err(|e| Error::InvalidInput(format!("parse zone map {path:?}: {e}")))?;

    config.n_bits = file.n_bits;
    let cache = Arc::new(IndexCache::new(&config.cache));

    let mut zones = Vec::with_capacity(file.zones.len());
    for entry in &file.zones {
        let backend = entry.backend.build()?;
        zones.push(Zone {
            name: entry.name.clone(),
            range: entry.range,
            retriever: Arc::new(ShardRetriever::new(backend, config, cache.clone())),
        });
    }
    MultiZoneRetriever::new(file.n_bits, zones)
}

/// Build the full application state from the environment.
pub fn app_state_from_env() -> Result<AppState> {
    let mut config = store_config_from_env()?;
    let backend_kind = env_or("DESTORE_BACKEND", "local");

    match backend_kind.as_str() {
        "local" | "s3" => {
            let backend: Arc<dyn Backend> = if backend_kind == "s3" {
                let bucket = std::env::var("DESTORE_BUCKET").map_err(|_| {
                    Error::InvalidInput("DESTORE_BUCKET is required for the s3 backend".into())
                })?;
                let prefix = std::env::var("DESTORE_PREFIX").ok();
                let region = std::env::var("DESTORE_S3_REGION").ok();
                let endpoint = std::env::var("DESTORE_S3_ENDPOINT").ok();
                Arc::new(ObjectStoreBackend::s3(
                    &bucket,
                    prefix.as_deref(),
                    region.as_deref(),
                    endpoint.as_deref(),
                )?)
            } else {
                let base_dir = env_or("DESTORE_BASE_DIR", "./data/destore");
                Arc::new(ObjectStoreBackend::local(base_dir)?)
            };

            let cache = Arc::new(IndexCache::new(&config.cache));
            let retriever = Arc::new(ShardRetriever::new(backend.clone(), &config, cache));
            let retention = Arc::new(ExtendedRetentionManager::new(
                backend,
                config.overlay_prefix.clone(),
            ));
            Ok(AppState {
                store: retriever as Arc<dyn FileStore>,
                retention: Some(retention),
            })
        }
        "multi" => {
            let zones_path = std::env::var("DESTORE_ZONES_CONFIG").map_err(|_| {
                Error::InvalidInput("DESTORE_ZONES_CONFIG is required for the multi backend".into())
            })?;
            let multi = load_zone_map(&zones_path, &mut config)?;
            // Retention needs a single overlay back-end; zoned deployments
            // manage retention out of band.
            Ok(AppState {
                store: Arc::new(multi) as Arc<dyn FileStore>,
                retention: None,
            })
        }
        other => Err(Error::InvalidInput(format!(
            "unsupported DESTORE_BACKEND {other:?}"
        ))),
    }
}
