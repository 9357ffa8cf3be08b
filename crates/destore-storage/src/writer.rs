//! Shard Writer
//!
//! Materializes one shard object from an ordered stream of `(uid, payload,
//! meta)` appends. The shard accumulates in memory as
//! `[HEADER | DATA...]`; `close()` serializes the index and footer behind the
//! data and publishes the whole object with a single PUT, so a shard either
//! appears complete or not at all. Dropping a writer without closing it
//! publishes nothing.
//!
//! Per append, the writer decides between two payload paths:
//!
//! - **Inline**: the compression heuristic picks a codec (or falls back to
//!   raw), the body lands at the current data cursor, and the index records
//!   offset/length/codec/sizes.
//! - **BigFile**: payloads at or above the threshold are streamed through
//!   SHA-256 and PUT as a content-addressed sibling object; the index records
//!   only the hash and size. Identical payloads share one sibling, and a
//!   crash after a sibling PUT leaves nothing harmful behind.
//!
//! The writer is externally single-threaded: one writer per shard, one shard
//! per open. Parallel packing runs multiple writers on disjoint
//! `(date_dir, shard_hex)` groups.
//!
//! State machine: a live value is OPEN (appends allowed); `close()` consumes
//! the writer (CLOSING, then CLOSED once the PUT returns). Append-after-close
//! is unrepresentable.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use destore_core::shard::{self, FOOTER_SIZE, VERSION_V2};
use destore_core::{CompressionConfig, EntryPayload, IndexEntry, ShardIndex};
use sha2::{Digest, Sha256};

use crate::backend::Backend;
use crate::error::{Error, Result};

/// Summary of one published shard.
#[derive(Debug, Clone)]
pub struct CloseSummary {
    pub object_key: String,
    pub bytes_written: u64,
    pub entries: usize,
    /// SHA-256 hex of every BigFile sibling this shard references.
    pub bigfile_hashes: Vec<String>,
}

/// Streams payloads into one growing shard and publishes it on close.
pub struct ShardWriter {
    backend: Arc<dyn Backend>,
    object_key: String,
    compression: CompressionConfig,
    bigfile_threshold: u64,
    bigfiles_prefix: String,
    max_size: Option<u64>,

    /// Header plus data section, in final byte order.
    buf: BytesMut,
    entries: Vec<IndexEntry>,
    index_bytes_estimate: u64,
    bigfile_hashes: Vec<String>,
}

impl ShardWriter {
    /// Open a writer for one physical shard at `object_key`.
    pub fn open(
        backend: Arc<dyn Backend>,
        object_key: impl Into<String>,
        compression: CompressionConfig,
        bigfile_threshold: u64,
        bigfiles_prefix: impl Into<String>,
        max_size: Option<u64>,
    ) -> Self {
        let mut buf = BytesMut::new();
        buf.put_slice(&shard::encode_header(VERSION_V2));
        Self {
            backend,
            object_key: object_key.into(),
            compression,
            bigfile_threshold,
            bigfiles_prefix: bigfiles_prefix.into(),
            max_size,
            buf,
            entries: Vec::new(),
            index_bytes_estimate: 0,
            bigfile_hashes: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Size of the final object if the shard were closed now.
    pub fn estimated_size(&self) -> u64 {
        self.buf.len() as u64 + self.index_bytes_estimate + FOOTER_SIZE
    }

    /// Append one file. Duplicate UIDs are legal and keep arrival order; the
    /// reader resolves the last occurrence.
    pub async fn append(&mut self, uid: &str, payload: &[u8], meta: Bytes) -> Result<()> {
        if uid.is_empty() {
            return Err(Error::InvalidInput("uid must not be empty".to_string()));
        }
        if uid.len() > u16::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "uid too long: {} bytes",
                uid.len()
            )));
        }

        let entry = if payload.len() as u64 >= self.bigfile_threshold {
            self.append_bigfile(uid, payload, meta).await?
        } else {
            self.append_inline(uid, payload, meta)?
        };

        self.index_bytes_estimate += entry.encoded_len() as u64;
        self.entries.push(entry);
        Ok(())
    }

    fn append_inline(&mut self, uid: &str, payload: &[u8], meta: Bytes) -> Result<IndexEntry> {
        let (codec, body) = self.compression.encode_for_entry(uid, payload)?;

        let entry = IndexEntry {
            uid: uid.to_string(),
            meta,
            payload: EntryPayload::Inline {
                offset: self.buf.len() as u64,
                length: body.len() as u64,
                codec,
                compressed_size: body.len() as u64,
                uncompressed_size: payload.len() as u64,
            },
        };

        if let Some(max) = self.max_size {
            let projected =
                self.estimated_size() + body.len() as u64 + entry.encoded_len() as u64;
            if projected > max {
                return Err(Error::ShardTooLarge {
                    uid: uid.to_string(),
                    needed: projected,
                    max,
                });
            }
        }

        self.buf.put_slice(&body);
        Ok(entry)
    }

    async fn append_bigfile(&mut self, uid: &str, payload: &[u8], meta: Bytes) -> Result<IndexEntry> {
        let hash = hex::encode(Sha256::digest(payload));
        let sibling_key = format!("{}/{}", self.bigfiles_prefix, hash);

        self.backend
            .put_if_absent(&sibling_key, Bytes::copy_from_slice(payload))
            .await?;

        tracing::debug!(
            uid,
            sibling_key = %sibling_key,
            size = payload.len(),
            "externalized bigfile payload"
        );

        self.bigfile_hashes.push(hash.clone());
        Ok(IndexEntry {
            uid: uid.to_string(),
            meta,
            payload: EntryPayload::BigFile {
                hash,
                size: payload.len() as u64,
            },
        })
    }

    /// Serialize index and footer, publish the shard, and return its summary.
    ///
    /// Nothing is visible on the back-end until the single PUT completes; on
    /// error the shard simply does not exist (stray BigFile siblings are
    /// content-addressed and harmless).
    pub async fn close(mut self) -> Result<CloseSummary> {
        if self.entries.is_empty() {
            return Err(Error::InvalidInput(
                "cannot close a shard with no entries".to_string(),
            ));
        }

        let index = ShardIndex::encode(&self.entries)?;
        let index_size = index.len() as u64;
        self.buf.put_slice(&index);
        self.buf.put_slice(&shard::encode_footer(index_size));

        let bytes_written = self.buf.len() as u64;
        self.backend
            .put(&self.object_key, self.buf.freeze())
            .await?;

        tracing::info!(
            object_key = %self.object_key,
            bytes = bytes_written,
            entries = self.entries.len(),
            bigfiles = self.bigfile_hashes.len(),
            "published shard"
        );

        Ok(CloseSummary {
            object_key: self.object_key,
            bytes_written,
            entries: self.entries.len(),
            bigfile_hashes: self.bigfile_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectStoreBackend;
    use destore_core::shard::{decode_footer, decode_header, HEADER_SIZE};

    fn backend() -> Arc<dyn Backend> {
        Arc::new(ObjectStoreBackend::memory("mem"))
    }

    fn writer(backend: Arc<dyn Backend>) -> ShardWriter {
        ShardWriter::open(
            backend,
            "20240115/ab.des",
            CompressionConfig::none(),
            10 * 1024 * 1024,
            "_bigFiles",
            None,
        )
    }

    #[tokio::test]
    async fn test_layout_is_header_data_index_footer() {
        let backend = backend();
        let mut w = writer(backend.clone());
        w.append("a", b"aaaa", Bytes::new()).await.unwrap();
        w.append("b", b"bb", Bytes::new()).await.unwrap();
        let summary = w.close().await.unwrap();

        let bytes = backend.get(&summary.object_key).await.unwrap();
        assert_eq!(bytes.len() as u64, summary.bytes_written);

        // Header
        assert_eq!(decode_header(&bytes).unwrap(), VERSION_V2);
        // Data section: payloads back to back, no padding
        assert_eq!(&bytes[HEADER_SIZE as usize..HEADER_SIZE as usize + 6], b"aaaabb");
        // Footer delimits the index
        let footer = &bytes[bytes.len() - FOOTER_SIZE as usize..];
        let index_size = decode_footer(footer).unwrap();
        let index_start = bytes.len() as u64 - FOOTER_SIZE - index_size;
        assert_eq!(index_start, HEADER_SIZE + 6);
    }

    #[tokio::test]
    async fn test_nothing_published_before_close() {
        let backend = backend();
        let mut w = writer(backend.clone());
        w.append("a", b"payload", Bytes::new()).await.unwrap();
        assert!(!backend.exists("20240115/ab.des").await.unwrap());
        drop(w);
        assert!(!backend.exists("20240115/ab.des").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_shard_cannot_close() {
        let w = writer(backend());
        assert!(matches!(
            w.close().await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_bigfile_threshold_boundary() {
        let backend = backend();
        let threshold = 1024u64;
        let mut w = ShardWriter::open(
            backend.clone(),
            "20240115/ab.des",
            CompressionConfig::none(),
            threshold,
            "_bigFiles",
            None,
        );

        // One byte under: inline.
        w.append("small", &vec![1u8; threshold as usize - 1], Bytes::new())
            .await
            .unwrap();
        // Exactly at the threshold: bigfile.
        let big_payload = vec![2u8; threshold as usize];
        w.append("big", &big_payload, Bytes::new()).await.unwrap();
        let summary = w.close().await.unwrap();

        assert_eq!(summary.bigfile_hashes.len(), 1);
        let hash = &summary.bigfile_hashes[0];
        assert_eq!(hash, &hex::encode(Sha256::digest(&big_payload)));

        let sibling = backend.get(&format!("_bigFiles/{hash}")).await.unwrap();
        assert_eq!(sibling, big_payload);

        // Only the inline payload is in the data section.
        let shard_bytes = backend.get(&summary.object_key).await.unwrap();
        let footer = decode_footer(&shard_bytes[shard_bytes.len() - FOOTER_SIZE as usize..]).unwrap();
        let data_len = shard_bytes.len() as u64 - HEADER_SIZE - footer - FOOTER_SIZE;
        assert_eq!(data_len, threshold - 1);
    }

    #[tokio::test]
    async fn test_identical_bigfiles_share_one_sibling() {
        let backend = backend();
        let mut w = ShardWriter::open(
            backend.clone(),
            "20240115/ab.des",
            CompressionConfig::none(),
            16,
            "_bigFiles",
            None,
        );
        let payload = vec![7u8; 64];
        w.append("first", &payload, Bytes::new()).await.unwrap();
        w.append("second", &payload, Bytes::new()).await.unwrap();
        let summary = w.close().await.unwrap();

        assert_eq!(summary.bigfile_hashes[0], summary.bigfile_hashes[1]);
    }

    #[tokio::test]
    async fn test_shard_too_large_on_oversized_append() {
        let mut w = ShardWriter::open(
            backend(),
            "20240115/ab.des",
            CompressionConfig::none(),
            10 * 1024 * 1024,
            "_bigFiles",
            Some(256),
        );
        let err = w
            .append("huge", &vec![0u8; 1024], Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShardTooLarge { .. }));
        assert_eq!(w.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_estimated_size_tracks_appends() {
        let mut w = writer(backend());
        let empty = w.estimated_size();
        assert_eq!(empty, HEADER_SIZE + FOOTER_SIZE);
        w.append("a", &[0u8; 100], Bytes::new()).await.unwrap();
        assert!(w.estimated_size() > empty + 100);
    }

    #[tokio::test]
    async fn test_duplicate_uid_appends_in_order() {
        let backend = backend();
        let mut w = writer(backend.clone());
        w.append("dup", b"old", Bytes::new()).await.unwrap();
        w.append("dup", b"newer", Bytes::new()).await.unwrap();
        let summary = w.close().await.unwrap();
        assert_eq!(summary.entries, 2);
    }

    #[tokio::test]
    async fn test_empty_uid_rejected() {
        let mut w = writer(backend());
        assert!(matches!(
            w.append("", b"x", Bytes::new()).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
