//! Pack planning.
//!
//! The planner is pure: it assigns every manifest entry to a shard key via
//! the router, keeps each group in input order, and splits a group into
//! multiple shards when the accumulated size estimate would cross the shard
//! size cap. No I/O happens here — the packer drives writers from the
//! resulting plan.
//!
//! Re-running the planner on an identical manifest yields an identical plan,
//! which is what makes packing idempotent for deterministic codecs.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use destore_core::routing::{self, SHARD_EXTENSION};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Where a manifest entry's payload bytes come from.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    Bytes(Bytes),
    Path(PathBuf),
}

impl PayloadSource {
    pub async fn load(&self) -> Result<Bytes> {
        match self {
            PayloadSource::Bytes(bytes) => Ok(bytes.clone()),
            PayloadSource::Path(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| Error::Backend(format!("read {}: {e}", path.display()))),
        }
    }
}

/// One manifest entry handed to the packer.
#[derive(Debug, Clone)]
pub struct FileToPack {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub payload: PayloadSource,
    /// Opaque caller bytes stored verbatim in the index entry.
    pub meta: Option<Bytes>,
}

impl FileToPack {
    pub fn from_bytes(uid: impl Into<String>, created_at: DateTime<Utc>, bytes: Bytes) -> Self {
        Self {
            uid: uid.into(),
            created_at,
            size_bytes: bytes.len() as u64,
            payload: PayloadSource::Bytes(bytes),
            meta: None,
        }
    }
}

/// Identity of one logical shard: a calendar day plus a routing slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKey {
    pub date_dir: String,
    pub shard_hex: String,
}

impl ShardKey {
    pub fn new(date_dir: impl Into<String>, shard_hex: impl Into<String>) -> Self {
        Self {
            date_dir: date_dir.into(),
            shard_hex: shard_hex.into(),
        }
    }

    /// Object key when the group fits in a single shard.
    pub fn base_key(&self) -> String {
        format!("{}/{}.{SHARD_EXTENSION}", self.date_dir, self.shard_hex)
    }

    /// Object key of the `split`-th shard of an overflowing group.
    pub fn split_key(&self, split: usize) -> String {
        format!(
            "{}/{}_{split:04}.{SHARD_EXTENSION}",
            self.date_dir, self.shard_hex
        )
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date_dir, self.shard_hex)
    }
}

/// One shard to be written: its target key and the files it will hold.
#[derive(Debug)]
pub struct PlannedShard {
    pub key: ShardKey,
    pub object_key: String,
    pub estimated_bytes: u64,
    pub files: Vec<FileToPack>,
}

/// Fixed bytes every shard carries regardless of content.
const SHARD_FRAME_BYTES: u64 =
    destore_core::shard::HEADER_SIZE + destore_core::shard::FOOTER_SIZE;

/// Estimated contribution of one file: payload bytes (inline only — BigFile
/// payloads live outside the shard) plus its index entry.
fn estimated_file_bytes(file: &FileToPack, config: &StoreConfig) -> u64 {
    let meta_len = file.meta.as_ref().map_or(0, |m| m.len() as u64);
    let uid_len = file.uid.len() as u64;
    if file.size_bytes >= config.bigfile_threshold_bytes {
        // name_len + uid + flags + (hash_len + sha256 hex + size) + meta_len + meta
        2 + uid_len + 1 + (2 + 64 + 8) + 4 + meta_len
    } else {
        // name_len + uid + flags + inline body fields + meta_len + meta
        file.size_bytes + 2 + uid_len + 1 + 33 + 4 + meta_len
    }
}

/// Group a manifest by shard key and split groups by the size cap.
///
/// Groups appear in first-seen manifest order; files keep their input order
/// within each group.
pub fn build_pack_plan(files: Vec<FileToPack>, config: &StoreConfig) -> Result<Vec<PlannedShard>> {
    if config.max_shard_size_bytes == 0 {
        return Err(Error::InvalidInput(
            "max_shard_size_bytes must be positive".to_string(),
        ));
    }

    let mut order: Vec<ShardKey> = Vec::new();
    let mut groups: HashMap<ShardKey, Vec<FileToPack>> = HashMap::new();

    for file in files {
        let loc = routing::locate(&file.uid, file.created_at, config.n_bits)?;
        let key = ShardKey::new(loc.date_dir, loc.shard_hex);
        match groups.entry(key.clone()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                order.push(key);
                slot.insert(vec![file]);
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                slot.get_mut().push(file);
            }
        }
    }

    let mut plan = Vec::new();
    for key in order {
        let group = groups.remove(&key).expect("group exists for ordered key");
        let mut shards: Vec<(u64, Vec<FileToPack>)> = Vec::new();
        let mut current: Vec<FileToPack> = Vec::new();
        let mut current_bytes = SHARD_FRAME_BYTES;

        for file in group {
            let file_bytes = estimated_file_bytes(&file, config);
            if !current.is_empty() && current_bytes + file_bytes > config.max_shard_size_bytes {
                shards.push((current_bytes, std::mem::take(&mut current)));
                current_bytes = SHARD_FRAME_BYTES;
            }
            current_bytes += file_bytes;
            current.push(file);
        }
        if !current.is_empty() {
            shards.push((current_bytes, current));
        }

        let split = shards.len() > 1;
        for (i, (estimated_bytes, files)) in shards.into_iter().enumerate() {
            let object_key = if split { key.split_key(i) } else { key.base_key() };
            plan.push(PlannedShard {
                key: key.clone(),
                object_key,
                estimated_bytes,
                files,
            });
        }
    }

    Ok(plan)
}

/// Pre-flight estimate: how many shards each key will produce.
pub fn estimate_shard_counts(
    files: &[FileToPack],
    config: &StoreConfig,
) -> Result<HashMap<ShardKey, usize>> {
    let plan = build_pack_plan(files.to_vec(), config)?;
    let mut counts: HashMap<ShardKey, usize> = HashMap::new();
    for shard in plan {
        *counts.entry(shard.key).or_default() += 1;
    }
    Ok(counts)
}
