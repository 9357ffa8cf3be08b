//! Index entry encoding.
//!
//! Inline and BigFile entries share a `uid + meta` prefix and diverge on the
//! flags byte, so the entry is a tagged sum type rather than two record
//! kinds. Version 1 entries (legacy, read-only) have no flags byte and no
//! meta and are always inline.

use bytes::{BufMut, Bytes, BytesMut};

use crate::compression::Codec;
use crate::error::{Error, Result};

use super::{VERSION_V1, VERSION_V2};

const FLAG_BIGFILE: u8 = 0b0000_0001;

/// Where an entry's payload lives and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPayload {
    /// Payload bytes are in this shard's data section.
    Inline {
        /// Absolute offset from the start of the shard object.
        offset: u64,
        /// Stored byte count in the data section.
        length: u64,
        codec: Codec,
        /// Equal to `length`; carried separately on the wire.
        compressed_size: u64,
        uncompressed_size: u64,
    },
    /// Payload is a content-addressed sibling object.
    BigFile {
        /// Lowercase ASCII SHA-256 hex of the payload bytes.
        hash: String,
        /// Payload size in bytes.
        size: u64,
    },
}

/// One file record in a shard index, in append order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub uid: String,
    /// Opaque caller bytes, preserved verbatim. Empty for v1 entries.
    pub meta: Bytes,
    pub payload: EntryPayload,
}

impl IndexEntry {
    /// Uncompressed payload size, regardless of where the payload lives.
    pub fn uncompressed_size(&self) -> u64 {
        match &self.payload {
            EntryPayload::Inline {
                uncompressed_size, ..
            } => *uncompressed_size,
            EntryPayload::BigFile { size, .. } => *size,
        }
    }

    pub fn is_bigfile(&self) -> bool {
        matches!(self.payload, EntryPayload::BigFile { .. })
    }

    /// Serialized size of this entry in the v2 layout.
    pub fn encoded_len(&self) -> usize {
        let body = match &self.payload {
            EntryPayload::Inline { .. } => 8 + 8 + 1 + 8 + 8,
            EntryPayload::BigFile { hash, .. } => 2 + hash.len() + 8,
        };
        2 + self.uid.len() + 1 + body + 4 + self.meta.len()
    }

    /// Append this entry to `buf` in the v2 layout.
    pub fn encode_v2(&self, buf: &mut BytesMut) -> Result<()> {
        let uid_bytes = self.uid.as_bytes();
        if uid_bytes.is_empty() {
            return Err(Error::InvalidInput("uid must not be empty".to_string()));
        }
        if uid_bytes.len() > u16::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "uid too long to encode: {} bytes",
                uid_bytes.len()
            )));
        }
        if self.meta.len() > u32::MAX as usize {
            return Err(Error::InvalidInput("meta too large to encode".to_string()));
        }

        buf.put_u16(uid_bytes.len() as u16);
        buf.put_slice(uid_bytes);

        match &self.payload {
            EntryPayload::Inline {
                offset,
                length,
                codec,
                compressed_size,
                uncompressed_size,
            } => {
                buf.put_u8(0);
                buf.put_u64(*offset);
                buf.put_u64(*length);
                buf.put_u8(codec.id());
                buf.put_u64(*compressed_size);
                buf.put_u64(*uncompressed_size);
            }
            EntryPayload::BigFile { hash, size } => {
                if hash.len() > u16::MAX as usize || !hash.is_ascii() {
                    return Err(Error::InvalidInput(format!(
                        "malformed bigfile hash: {hash:?}"
                    )));
                }
                buf.put_u8(FLAG_BIGFILE);
                buf.put_u16(hash.len() as u16);
                buf.put_slice(hash.as_bytes());
                buf.put_u64(*size);
            }
        }

        buf.put_u32(self.meta.len() as u32);
        buf.put_slice(&self.meta);
        Ok(())
    }

    /// Decode one entry from `cursor` according to `version`.
    pub fn decode(cursor: &mut EntryCursor<'_>, version: u8) -> Result<Self> {
        let name_len = cursor.get_u16("name length")? as usize;
        if name_len == 0 {
            return Err(Error::CorruptShard("index entry with empty uid".to_string()));
        }
        let uid = std::str::from_utf8(cursor.take(name_len, "uid bytes")?)
            .map_err(|_| Error::CorruptShard("uid is not valid UTF-8".to_string()))?
            .to_string();

        match version {
            VERSION_V1 => {
                let offset = cursor.get_u64("offset")?;
                let length = cursor.get_u64("length")?;
                let codec = Codec::from_id(cursor.get_u8("codec id")?)?;
                let compressed_size = cursor.get_u64("compressed size")?;
                let uncompressed_size = cursor.get_u64("uncompressed size")?;
                Ok(IndexEntry {
                    uid,
                    meta: Bytes::new(),
                    payload: EntryPayload::Inline {
                        offset,
                        length,
                        codec,
                        compressed_size,
                        uncompressed_size,
                    },
                })
            }
            VERSION_V2 => {
                let flags = cursor.get_u8("flags")?;
                let payload = if flags & FLAG_BIGFILE != 0 {
                    let hash_len = cursor.get_u16("hash length")? as usize;
                    let hash = std::str::from_utf8(cursor.take(hash_len, "bigfile hash")?)
                        .map_err(|_| {
                            Error::CorruptShard("bigfile hash is not ASCII".to_string())
                        })?
                        .to_string();
                    let size = cursor.get_u64("bigfile size")?;
                    EntryPayload::BigFile { hash, size }
                } else {
                    let offset = cursor.get_u64("offset")?;
                    let length = cursor.get_u64("length")?;
                    let codec = Codec::from_id(cursor.get_u8("codec id")?)?;
                    let compressed_size = cursor.get_u64("compressed size")?;
                    let uncompressed_size = cursor.get_u64("uncompressed size")?;
                    EntryPayload::Inline {
                        offset,
                        length,
                        codec,
                        compressed_size,
                        uncompressed_size,
                    }
                };
                let meta_len = cursor.get_u32("meta length")? as usize;
                let meta = Bytes::copy_from_slice(cursor.take(meta_len, "meta bytes")?);
                Ok(IndexEntry { uid, meta, payload })
            }
            other => Err(Error::UnsupportedVersion(other)),
        }
    }
}

/// Bounds-checked reader over an index section.
///
/// Every read names the field it was after, so a truncated index fails with a
/// message pointing at the exact spot.
pub struct EntryCursor<'a> {
    buf: &'a [u8],
}

impl<'a> EntryCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::CorruptShard(format!(
                "index truncated while reading {field}: need {n} bytes, have {}",
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn get_u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn get_u16(&mut self, field: &str) -> Result<u16> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn get_u32(&mut self, field: &str) -> Result<u32> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn get_u64(&mut self, field: &str) -> Result<u64> {
        let bytes = self.take(8, field)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(out))
    }
}
