//! Packer — drives shard writers from a pack plan.
//!
//! This is the single entry point external migration drivers call:
//! `pack(manifest, config, backend)`. The driver owns its manifest and its
//! cutoff marker; the packer owns nothing beyond writing shards. A failed
//! file is skipped and recorded, not fatal — one unreadable or oversized
//! payload must not abort a multi-million-file run. A failed shard publish
//! likewise fails only the files of that shard.
//!
//! With `codec = none`, packing the same manifest twice produces
//! byte-identical shards.

use std::sync::Arc;

use crate::backend::Backend;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::planner::{build_pack_plan, FileToPack, ShardKey};
use crate::writer::ShardWriter;

/// Summary of one published shard.
#[derive(Debug, Clone)]
pub struct ShardWriteResult {
    pub shard_key: ShardKey,
    pub object_key: String,
    pub entries: usize,
    pub bytes_written: u64,
    pub bigfile_hashes: Vec<String>,
}

/// A file the packer had to skip, with the reason.
#[derive(Debug, Clone)]
pub struct PackFailure {
    pub uid: String,
    pub object_key: String,
    pub error: String,
}

/// Outcome of one pack run.
#[derive(Debug, Clone, Default)]
pub struct PackResult {
    pub shards: Vec<ShardWriteResult>,
    pub failures: Vec<PackFailure>,
    pub files_packed: usize,
}

impl PackResult {
    pub fn total_bytes_written(&self) -> u64 {
        self.shards.iter().map(|s| s.bytes_written).sum()
    }
}

/// Plan and write every shard for `files` onto `backend`.
///
/// Fails fast only on planning errors (invalid manifest or config); per-file
/// and per-shard I/O problems are isolated into `PackResult::failures`.
pub async fn pack(
    files: Vec<FileToPack>,
    config: &StoreConfig,
    backend: Arc<dyn Backend>,
) -> Result<PackResult> {
    let plan = build_pack_plan(files, config)?;
    let mut result = PackResult::default();

    for planned in plan {
        let mut writer = ShardWriter::open(
            backend.clone(),
            planned.object_key.clone(),
            config.compression.clone(),
            config.bigfile_threshold_bytes,
            config.bigfiles_prefix.clone(),
            Some(config.max_shard_size_bytes),
        );
        let mut appended: Vec<String> = Vec::new();

        for file in &planned.files {
            let payload = match file.payload.load().await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(uid = %file.uid, error = %e, "skipping unreadable file");
                    result.failures.push(PackFailure {
                        uid: file.uid.clone(),
                        object_key: planned.object_key.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match writer
                .append(&file.uid, &payload, file.meta.clone().unwrap_or_default())
                .await
            {
                Ok(()) => appended.push(file.uid.clone()),
                Err(e) => {
                    tracing::warn!(uid = %file.uid, error = %e, "skipping file that failed to append");
                    result.failures.push(PackFailure {
                        uid: file.uid.clone(),
                        object_key: planned.object_key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if writer.entry_count() == 0 {
            continue;
        }

        match writer.close().await {
            Ok(summary) => {
                result.files_packed += summary.entries;
                result.shards.push(ShardWriteResult {
                    shard_key: planned.key,
                    object_key: summary.object_key,
                    entries: summary.entries,
                    bytes_written: summary.bytes_written,
                    bigfile_hashes: summary.bigfile_hashes,
                });
            }
            Err(e) => {
                tracing::error!(
                    object_key = %planned.object_key,
                    error = %e,
                    "shard publish failed; its files were not packed"
                );
                for uid in appended {
                    result.failures.push(PackFailure {
                        uid,
                        object_key: planned.object_key.clone(),
                        error: format!("shard publish failed: {e}"),
                    });
                }
            }
        }
    }

    Ok(result)
}
