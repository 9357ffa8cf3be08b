//! Parsed shard index.
//!
//! The index section is a plain concatenation of entries; the footer's
//! `index_size` delimits it, so there is no entry count on the wire. Entries
//! stay in append order, and lookups resolve the *last* occurrence of a UID —
//! a shard may legally contain the same UID twice and the later write wins.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::error::{Error, Result};

use super::entry::{EntryCursor, EntryPayload, IndexEntry};
use super::HEADER_SIZE;

/// In-memory index of one shard, preserving append order.
#[derive(Debug, Clone, Default)]
pub struct ShardIndex {
    entries: Vec<IndexEntry>,
    by_uid: HashMap<String, usize>,
}

impl ShardIndex {
    /// Parse an index section.
    ///
    /// `data_section_end` is the absolute offset where the index starts (and
    /// the data section ends); every inline entry must fit inside
    /// `[HEADER_SIZE, data_section_end)`.
    pub fn parse(data: &[u8], version: u8, data_section_end: u64) -> Result<Self> {
        let mut cursor = EntryCursor::new(data);
        let mut index = ShardIndex::default();

        while cursor.remaining() > 0 {
            let entry = IndexEntry::decode(&mut cursor, version)?;
            if let EntryPayload::Inline { offset, length, .. } = &entry.payload {
                if *offset < HEADER_SIZE {
                    return Err(Error::CorruptShard(format!(
                        "entry {:?} overlaps the header (offset {offset})",
                        entry.uid
                    )));
                }
                let end = offset.checked_add(*length).ok_or_else(|| {
                    Error::CorruptShard(format!("entry {:?} offset overflow", entry.uid))
                })?;
                if end > data_section_end {
                    return Err(Error::CorruptShard(format!(
                        "entry {:?} extends past the data section ({end} > {data_section_end})",
                        entry.uid
                    )));
                }
            }
            index.push(entry);
        }

        Ok(index)
    }

    /// Serialize every entry in the v2 layout, in order.
    pub fn encode(entries: &[IndexEntry]) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(entries.iter().map(|e| e.encoded_len()).sum());
        for entry in entries {
            entry.encode_v2(&mut buf)?;
        }
        Ok(buf)
    }

    /// Append one entry; later entries for the same UID shadow earlier ones.
    pub fn push(&mut self, entry: IndexEntry) {
        self.by_uid.insert(entry.uid.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Resolve a UID to its (last) entry.
    pub fn get(&self, uid: &str) -> Option<&IndexEntry> {
        self.by_uid.get(uid).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.by_uid.contains_key(uid)
    }

    /// All entries in append order, duplicates included.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Distinct UIDs in first-seen order.
    pub fn uids(&self) -> Vec<&str> {
        let mut seen = HashMap::new();
        let mut out = Vec::new();
        for entry in &self.entries {
            if seen.insert(entry.uid.as_str(), ()).is_none() {
                out.push(entry.uid.as_str());
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rough heap footprint, used by the index cache's byte bound.
    pub fn estimated_size(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.encoded_len() + std::mem::size_of::<IndexEntry>())
            .sum()
    }
}
