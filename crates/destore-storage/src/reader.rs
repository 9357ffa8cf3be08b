//! Shard Reader — the three-range read protocol.
//!
//! Reconstructing one file from a cold shard costs exactly three range GETs:
//!
//! 1. **Footer**: a suffix read of the last 12 bytes. The same response
//!    carries the total object size, so no HEAD is needed. Validates the
//!    footer magic and yields `index_size`.
//! 2. **Index**: `[size - 12 - index_size, size - 12)`. Parsed into a
//!    [`CachedIndex`] that callers keep in the index cache.
//! 3. **Payload**: the entry's `[offset, offset + length)` slice, then
//!    decompression by the recorded codec. BigFile entries skip this range
//!    and fetch their content-addressed sibling whole instead.
//!
//! With a cached index, steps 1–2 disappear and a read is one range GET.
//!
//! Indexes are parsed as the v2 layout the writer emits. If that fails, the
//! reader fetches the 8-byte header once to learn the real version and
//! re-parses legacy v1 shards; v2 shards never pay that extra read.

use std::sync::Arc;

use bytes::Bytes;
use destore_core::shard::{
    decode_footer, decode_header, FOOTER_SIZE, HEADER_SIZE, VERSION_V1, VERSION_V2,
};
use destore_core::{EntryPayload, IndexEntry, ShardIndex};

use crate::backend::Backend;
use crate::cache::CachedIndex;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Reads entries out of shard objects on one back-end.
pub struct ShardReader {
    backend: Arc<dyn Backend>,
    bigfiles_prefix: String,
    retry: RetryPolicy,
}

impl ShardReader {
    pub fn new(
        backend: Arc<dyn Backend>,
        bigfiles_prefix: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            bigfiles_prefix: bigfiles_prefix.into(),
            retry,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Fetch and parse a shard's index: range reads 1 and 2 of the protocol.
    pub async fn load_index(&self, object_key: &str) -> Result<CachedIndex> {
        // Range 1: footer suffix, which also reveals the object size.
        let suffix = self
            .retry
            .run("shard footer read", || async {
                let read = self.backend.get_suffix(object_key, FOOTER_SIZE).await?;
                if read.bytes.len() as u64 != FOOTER_SIZE.min(read.object_size) {
                    return Err(Error::Backend(format!(
                        "short footer read: got {} bytes",
                        read.bytes.len()
                    )));
                }
                Ok(read)
            })
            .await?;

        if suffix.object_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::Shard(destore_core::Error::CorruptShard(format!(
                "object {object_key:?} too small to be a shard: {} bytes",
                suffix.object_size
            ))));
        }

        let index_size = decode_footer(&suffix.bytes).map_err(|e| self.corrupt(object_key, e))?;
        let index_start = index_size
            .checked_add(FOOTER_SIZE)
            .and_then(|tail| suffix.object_size.checked_sub(tail))
            .filter(|start| *start >= HEADER_SIZE)
            .ok_or_else(|| {
                self.corrupt(
                    object_key,
                    destore_core::Error::CorruptShard(format!(
                        "index size {index_size} inconsistent with object size {}",
                        suffix.object_size
                    )),
                )
            })?;

        // Range 2: the index section.
        let index_end = suffix.object_size - FOOTER_SIZE;
        let index_bytes = self
            .ranged(object_key, index_start, index_end, "shard index read")
            .await?;

        let index = match ShardIndex::parse(&index_bytes, VERSION_V2, index_start) {
            Ok(index) => index,
            Err(v2_err) => self
                .parse_legacy(object_key, &index_bytes, index_start, v2_err)
                .await?,
        };

        Ok(CachedIndex {
            index,
            object_size: suffix.object_size,
            index_start,
        })
    }

    /// Legacy path: confirm the version from the header, then parse as v1.
    async fn parse_legacy(
        &self,
        object_key: &str,
        index_bytes: &[u8],
        index_start: u64,
        v2_err: destore_core::Error,
    ) -> Result<ShardIndex> {
        let header = self
            .ranged(object_key, 0, HEADER_SIZE, "shard header read")
            .await?;
        let version = decode_header(&header).map_err(|e| self.corrupt(object_key, e))?;
        if version != VERSION_V1 {
            return Err(self.corrupt(object_key, v2_err));
        }
        ShardIndex::parse(index_bytes, VERSION_V1, index_start)
            .map_err(|e| self.corrupt(object_key, e))
    }

    /// Fetch and decode one entry's payload: range read 3 of the protocol
    /// (or a whole-object sibling GET for BigFiles).
    pub async fn read_entry(&self, object_key: &str, entry: &IndexEntry) -> Result<Bytes> {
        match &entry.payload {
            EntryPayload::Inline {
                offset,
                length,
                codec,
                uncompressed_size,
                ..
            } => {
                let body = self
                    .ranged(object_key, *offset, offset + length, "payload read")
                    .await?;
                let decoded = codec
                    .decode(&body, *uncompressed_size as usize)
                    .map_err(|e| self.corrupt(object_key, e))?;
                if decoded.len() as u64 != *uncompressed_size {
                    return Err(self.corrupt(
                        object_key,
                        destore_core::Error::CorruptShard(format!(
                            "entry {:?} decoded to {} bytes, index says {}",
                            entry.uid,
                            decoded.len(),
                            uncompressed_size
                        )),
                    ));
                }
                Ok(Bytes::from(decoded))
            }
            EntryPayload::BigFile { hash, size } => {
                let sibling_key = format!("{}/{}", self.bigfiles_prefix, hash);
                let bytes = self
                    .retry
                    .run("bigfile read", || self.backend.get(&sibling_key))
                    .await?;
                if bytes.len() as u64 != *size {
                    return Err(self.corrupt(
                        object_key,
                        destore_core::Error::CorruptShard(format!(
                            "bigfile {hash} is {} bytes, index says {size}",
                            bytes.len()
                        )),
                    ));
                }
                Ok(bytes)
            }
        }
    }

    /// Cold-path convenience: load the index and read one UID.
    pub async fn read(&self, object_key: &str, uid: &str) -> Result<Bytes> {
        let cached = self.load_index(object_key).await?;
        let entry = cached
            .index
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("uid {uid:?} in {object_key:?}")))?;
        self.read_entry(object_key, entry).await
    }

    /// Range read with retry and exact-length enforcement: a short response
    /// is retried as a transport fault, then surfaces as a backend error.
    async fn ranged(&self, object_key: &str, start: u64, end: u64, what: &str) -> Result<Bytes> {
        let expected = end - start;
        self.retry
            .run(what, || async {
                let bytes = self.backend.get_range(object_key, start..end).await?;
                if bytes.len() as u64 != expected {
                    return Err(Error::Backend(format!(
                        "short range read on {object_key:?}: wanted {expected} bytes at {start}, got {}",
                        bytes.len()
                    )));
                }
                Ok(bytes)
            })
            .await
    }

    fn corrupt(&self, object_key: &str, e: destore_core::Error) -> Error {
        tracing::error!(object_key, error = %e, "corrupt shard");
        Error::from(e)
    }
}
