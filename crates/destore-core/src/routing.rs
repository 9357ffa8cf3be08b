//! Deterministic shard routing.
//!
//! Maps `(uid, created_at, n_bits)` to a concrete shard location without
//! consulting any database or external state. The same inputs always produce
//! the same location, across processes and across implementations: the shard
//! index is CRC32-IEEE over the raw UID bytes, masked to `n_bits`.
//!
//! ## Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//!
//! let created_at = Utc.with_ymd_and_hms(2024, 11, 15, 10, 0, 0).unwrap();
//! let loc = destore_core::locate("file-000001", created_at, 8).unwrap();
//! assert_eq!(loc.date_dir, "20241115");
//! assert_eq!(loc.object_key, format!("20241115/{}.des", loc.shard_hex));
//! ```

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Smallest permitted routing width: 2^4 = 16 shards per day.
pub const MIN_ROUTING_BITS: u8 = 4;

/// Largest permitted routing width: 2^16 = 65536 shards per day.
pub const MAX_ROUTING_BITS: u8 = 16;

/// Filename extension for shard container objects.
pub const SHARD_EXTENSION: &str = "des";

/// Resolved storage location for a single `(uid, created_at)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    /// UTC calendar date of `created_at`, formatted `YYYYMMDD`.
    pub date_dir: String,
    /// Shard index in `[0, 2^n_bits)`.
    pub shard_index: u32,
    /// Lowercase hex of `shard_index`, zero-padded to `ceil(n_bits / 4)`.
    pub shard_hex: String,
    /// Base object key, `<date_dir>/<shard_hex>.des`. Split variants append
    /// a writer-chosen `_<nnnn>` suffix before the extension.
    pub object_key: String,
}

fn validate_n_bits(n_bits: u8) -> Result<u8> {
    if !(MIN_ROUTING_BITS..=MAX_ROUTING_BITS).contains(&n_bits) {
        return Err(Error::InvalidInput(format!(
            "n_bits must be in [{MIN_ROUTING_BITS}, {MAX_ROUTING_BITS}], got {n_bits}"
        )));
    }
    Ok(n_bits)
}

/// Format a timestamp as the `YYYYMMDD` date directory (UTC).
pub fn date_dir(created_at: DateTime<Utc>) -> String {
    created_at.format("%Y%m%d").to_string()
}

/// Compute the shard index for a UID: `crc32(uid) & ((1 << n_bits) - 1)`.
pub fn shard_index(uid: &str, n_bits: u8) -> Result<u32> {
    let bits = validate_n_bits(n_bits)?;
    if uid.is_empty() {
        return Err(Error::InvalidInput("uid must not be empty".to_string()));
    }
    let mask = (1u32 << bits) - 1;
    Ok(crc32fast::hash(uid.as_bytes()) & mask)
}

/// Format a shard index as lowercase hex, zero-padded to `ceil(n_bits / 4)`.
pub fn shard_index_to_hex(index: u32, n_bits: u8) -> Result<String> {
    let bits = validate_n_bits(n_bits)?;
    let max = (1u32 << bits) - 1;
    if index > max {
        return Err(Error::InvalidInput(format!(
            "shard index {index} outside [0, {max}]"
        )));
    }
    let width = (bits as usize).div_ceil(4);
    Ok(format!("{index:0width$x}"))
}

/// Assemble the base object key for a shard.
pub fn object_key(date_dir: &str, shard_hex: &str) -> String {
    format!("{date_dir}/{shard_hex}.{SHARD_EXTENSION}")
}

/// Resolve the full shard location for a UID and timestamp.
///
/// Pure and idempotent; fails only on an empty UID or `n_bits` out of range.
pub fn locate(uid: &str, created_at: DateTime<Utc>, n_bits: u8) -> Result<ShardLocation> {
    let index = shard_index(uid, n_bits)?;
    let hex = shard_index_to_hex(index, n_bits)?;
    let date = date_dir(created_at);
    let key = object_key(&date, &hex);
    Ok(ShardLocation {
        date_dir: date,
        shard_index: index,
        shard_hex: hex,
        object_key: key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_locate_is_deterministic() {
        let a = locate("file-000001", ts(2024, 11, 15), 8).unwrap();
        let b = locate("file-000001", ts(2024, 11, 15), 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_locate_matches_crc32_mask() {
        let loc = locate("file-000001", ts(2024, 11, 15), 8).unwrap();
        let expected = crc32fast::hash(b"file-000001") & 0xff;
        assert_eq!(loc.shard_index, expected);
        assert_eq!(loc.shard_hex, format!("{expected:02x}"));
        assert_eq!(loc.object_key, format!("20241115/{expected:02x}.des"));
    }

    #[test]
    fn test_known_crc32_vector() {
        // CRC32-IEEE("a") = 0xe8b7be43
        assert_eq!(crc32fast::hash(b"a"), 0xe8b7_be43);
        let loc = locate("a", ts(2024, 1, 1), 8).unwrap();
        assert_eq!(loc.shard_index, 0x43);
        assert_eq!(loc.shard_hex, "43");
    }

    #[test]
    fn test_date_dir_is_utc_calendar_date() {
        let loc = locate("uid", ts(2024, 1, 15), 8).unwrap();
        assert_eq!(loc.date_dir, "20240115");
    }

    #[test]
    fn test_same_uid_different_day_routes_to_different_shard_object() {
        let a = locate("uid", ts(2024, 1, 15), 8).unwrap();
        let b = locate("uid", ts(2024, 1, 16), 8).unwrap();
        assert_eq!(a.shard_index, b.shard_index);
        assert_ne!(a.object_key, b.object_key);
    }

    #[test]
    fn test_hex_width_follows_n_bits() {
        // 4 bits -> 1 char, 8 -> 2, 10 -> 3 (ceil), 16 -> 4
        assert_eq!(shard_index_to_hex(0xf, 4).unwrap(), "f");
        assert_eq!(shard_index_to_hex(5, 8).unwrap(), "05");
        assert_eq!(shard_index_to_hex(5, 10).unwrap(), "005");
        assert_eq!(shard_index_to_hex(0xabcd, 16).unwrap(), "abcd");
    }

    #[test]
    fn test_hex_is_lowercase() {
        let hex = shard_index_to_hex(0xAB, 8).unwrap();
        assert_eq!(hex, "ab");
    }

    #[test]
    fn test_shard_index_bounded_by_n_bits() {
        for n_bits in MIN_ROUTING_BITS..=MAX_ROUTING_BITS {
            let max = (1u32 << n_bits) - 1;
            for uid in ["a", "b", "some-longer-uid", "42"] {
                let index = shard_index(uid, n_bits).unwrap();
                assert!(index <= max, "index {index} > {max} for n_bits {n_bits}");
            }
        }
    }

    #[test]
    fn test_numeric_uid_uses_crc32_not_modulo() {
        // "42" as a string hashes through CRC32 like any other UID.
        let index = shard_index("42", 8).unwrap();
        assert_eq!(index, crc32fast::hash(b"42") & 0xff);
    }

    #[test]
    fn test_empty_uid_rejected() {
        let err = locate("", ts(2024, 1, 1), 8).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_n_bits_out_of_range_rejected() {
        assert!(matches!(
            locate("uid", ts(2024, 1, 1), 3),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            locate("uid", ts(2024, 1, 1), 17),
            Err(Error::InvalidInput(_))
        ));
        assert!(locate("uid", ts(2024, 1, 1), 4).is_ok());
        assert!(locate("uid", ts(2024, 1, 1), 16).is_ok());
    }

    #[test]
    fn test_shard_hex_rejects_out_of_range_index() {
        assert!(shard_index_to_hex(16, 4).is_err());
        assert!(shard_index_to_hex(256, 8).is_err());
    }
}
