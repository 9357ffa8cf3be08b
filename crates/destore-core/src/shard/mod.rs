//! Shard Container Format
//!
//! A shard is one append-only container object holding many small files. The
//! byte layout is exactly:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                            │
//! │ - Magic bytes: "DES2" (4 bytes)                             │
//! │ - Version: 1 or 2 (1 byte)                                  │
//! │ - Reserved, zeroed (3 bytes)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Data section                                                │
//! │ - Inline payloads back-to-back, in append order, no padding │
//! │ - BigFile payloads are NOT here (sibling objects)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Index                                                       │
//! │ - One record per appended file, in append order             │
//! │ - v2 records carry a flags byte and opaque meta bytes; a    │
//! │   set BigFile flag switches the record body to a SHA-256    │
//! │   reference instead of an offset/length pair                │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (12 bytes)                                           │
//! │ - Magic bytes: "DESI" (4 bytes)                             │
//! │ - Index size in bytes (8 bytes)                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte integers are big-endian. The index starts at
//! `file_size - FOOTER_SIZE - index_size`, which is also where the data
//! section ends. A reader that has the last 12 bytes of the object can locate
//! and fetch the index with one more range read, then any payload with a
//! third — the whole read protocol is three range requests.
//!
//! Version 1 is a legacy read-only layout: inline-only records without flags
//! or meta. Writers always emit version 2.

mod entry;
mod index;

pub use entry::{EntryCursor, EntryPayload, IndexEntry};
pub use index::ShardIndex;

use crate::error::{Error, Result};

/// Magic bytes opening every shard: "DES2".
pub const HEADER_MAGIC: [u8; 4] = *b"DES2";

/// Magic bytes opening the footer: "DESI".
pub const FOOTER_MAGIC: [u8; 4] = *b"DESI";

/// Legacy inline-only format version.
pub const VERSION_V1: u8 = 1;

/// Current format version (BigFile flag + meta bytes).
pub const VERSION_V2: u8 = 2;

/// Header length: magic + version + 3 reserved bytes.
pub const HEADER_SIZE: u64 = 8;

/// Footer length: magic + big-endian index size.
pub const FOOTER_SIZE: u64 = 12;

/// Absolute offset where the data section starts.
pub const DATA_START: u64 = HEADER_SIZE;

/// Encode the 8-byte shard header.
pub fn encode_header(version: u8) -> [u8; 8] {
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&HEADER_MAGIC);
    header[4] = version;
    header
}

/// Validate the header and return the format version.
pub fn decode_header(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(Error::CorruptShard(format!(
            "header truncated: {} bytes",
            bytes.len()
        )));
    }
    if bytes[..4] != HEADER_MAGIC {
        return Err(Error::CorruptShard("bad header magic".to_string()));
    }
    let version = bytes[4];
    if version != VERSION_V1 && version != VERSION_V2 {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Encode the 12-byte shard footer.
pub fn encode_footer(index_size: u64) -> [u8; 12] {
    let mut footer = [0u8; 12];
    footer[..4].copy_from_slice(&FOOTER_MAGIC);
    footer[4..].copy_from_slice(&index_size.to_be_bytes());
    footer
}

/// Validate the footer and return the index size.
pub fn decode_footer(bytes: &[u8]) -> Result<u64> {
    if bytes.len() < FOOTER_SIZE as usize {
        return Err(Error::CorruptShard(format!(
            "footer truncated: {} bytes",
            bytes.len()
        )));
    }
    if bytes[..4] != FOOTER_MAGIC {
        return Err(Error::CorruptShard("bad footer magic".to_string()));
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[4..12]);
    Ok(u64::from_be_bytes(size))
}
