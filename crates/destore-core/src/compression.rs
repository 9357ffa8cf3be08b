//! Per-entry compression codecs and the writer-side skip heuristic.
//!
//! The codec adapter knows nothing about shards or entries: it encodes and
//! decodes one byte sequence at a time. Which codec (if any) actually gets
//! applied to a payload is decided by [`CompressionConfig::encode_for_entry`],
//! the heuristic the shard writer runs per file. Correctness never depends on
//! the heuristic — readers trust only the codec id recorded in the index.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression codec applied to a single inline payload.
///
/// The discriminants are the wire codec ids stored in index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    /// Wire id recorded in the shard index.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Resolve a wire id back to a codec.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Codec::None),
            1 => Ok(Codec::Zstd),
            2 => Ok(Codec::Lz4),
            other => Err(Error::UnknownCodec(other)),
        }
    }

    /// Compress `data`. `level` is codec-specific; `None` uses the codec's
    /// default. `Codec::None` is the identity.
    pub fn encode(self, level: Option<i32>, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Zstd => {
                let level = level.unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL);
                zstd::bulk::compress(data, level).map_err(|e| Error::Compression(e.to_string()))
            }
            Codec::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        }
    }

    /// Decompress `data` back to at most `uncompressed_size` bytes.
    ///
    /// The caller is responsible for comparing the decoded length against the
    /// size recorded in the index.
    pub fn decode(self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        match self {
            Codec::None => Ok(data.to_vec()),
            Codec::Zstd => zstd::bulk::decompress(data, uncompressed_size)
                .map_err(|e| Error::Decompression(e.to_string())),
            Codec::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| Error::Decompression(e.to_string())),
        }
    }
}

fn default_min_size_bytes() -> u64 {
    512
}

fn default_min_ratio() -> f64 {
    0.90
}

fn default_skip_extensions() -> HashSet<String> {
    [
        "jpg", "jpeg", "png", "gif", "mp4", "webm", "gz", "zip", "bz2", "xz", "7z", "zst",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Configuration for the writer's compression heuristic.
///
/// A payload is stored uncompressed when its extension is in the skip set,
/// when it is smaller than `min_size_bytes`, or when the trial compression
/// ratio `compressed / original` exceeds `min_ratio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub codec: Codec,

    /// Codec-specific level; `None` uses the codec default.
    #[serde(default)]
    pub level: Option<i32>,

    /// Payloads below this size are never compressed (default: 512).
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,

    /// Keep the compressed form only if `compressed/original <= min_ratio`
    /// (default: 0.90).
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    /// Lowercase extensions (without the dot) stored uncompressed.
    #[serde(default = "default_skip_extensions")]
    pub skip_extensions: HashSet<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl CompressionConfig {
    /// No compression at all; every entry gets codec id 0.
    pub fn none() -> Self {
        Self {
            codec: Codec::None,
            level: None,
            min_size_bytes: default_min_size_bytes(),
            min_ratio: default_min_ratio(),
            skip_extensions: default_skip_extensions(),
        }
    }

    /// Zstd level 5, the default profile.
    pub fn balanced() -> Self {
        Self {
            codec: Codec::Zstd,
            level: Some(5),
            ..Self::none()
        }
    }

    /// Zstd level 9 for cold archives where CPU is cheap.
    pub fn aggressive() -> Self {
        Self {
            codec: Codec::Zstd,
            level: Some(9),
            ..Self::none()
        }
    }

    /// LZ4 at default level for throughput-bound packing.
    pub fn speed() -> Self {
        Self {
            codec: Codec::Lz4,
            level: None,
            ..Self::none()
        }
    }

    /// Whether the heuristic should even attempt compression for this file.
    pub fn should_try(&self, uid: &str, size_bytes: u64) -> bool {
        if self.codec == Codec::None {
            return false;
        }
        if size_bytes < self.min_size_bytes {
            return false;
        }
        if let Some(ext) = Path::new(uid).extension().and_then(|e| e.to_str()) {
            if self.skip_extensions.contains(&ext.to_ascii_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Apply the heuristic to one payload, returning the codec actually used
    /// and the bytes to store in the data section.
    pub fn encode_for_entry(&self, uid: &str, data: &[u8]) -> Result<(Codec, Vec<u8>)> {
        if !self.should_try(uid, data.len() as u64) {
            return Ok((Codec::None, data.to_vec()));
        }
        let compressed = self.codec.encode(self.level, data)?;
        let ratio = compressed.len() as f64 / data.len() as f64;
        if ratio > self.min_ratio {
            return Ok((Codec::None, data.to_vec()));
        }
        Ok((self.codec, compressed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Codec ids
    // ---------------------------------------------------------------

    #[test]
    fn test_codec_wire_ids() {
        assert_eq!(Codec::None.id(), 0);
        assert_eq!(Codec::Zstd.id(), 1);
        assert_eq!(Codec::Lz4.id(), 2);
    }

    #[test]
    fn test_codec_from_id_roundtrip() {
        for codec in [Codec::None, Codec::Zstd, Codec::Lz4] {
            assert_eq!(Codec::from_id(codec.id()).unwrap(), codec);
        }
    }

    #[test]
    fn test_unknown_codec_id_rejected() {
        assert!(matches!(Codec::from_id(3), Err(Error::UnknownCodec(3))));
        assert!(matches!(Codec::from_id(255), Err(Error::UnknownCodec(255))));
    }

    // ---------------------------------------------------------------
    // Encode / decode round-trips
    // ---------------------------------------------------------------

    #[test]
    fn test_none_is_identity() {
        let data = b"hello world".to_vec();
        let encoded = Codec::None.encode(None, &data).unwrap();
        assert_eq!(encoded, data);
        let decoded = Codec::None.decode(&encoded, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let data = vec![b'z'; 4096];
        let encoded = Codec::Zstd.encode(Some(5), &data).unwrap();
        assert!(encoded.len() < data.len());
        let decoded = Codec::Zstd.decode(&encoded, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_lz4_roundtrip() {
        let data = vec![0xab; 4096];
        let encoded = Codec::Lz4.encode(None, &data).unwrap();
        assert!(encoded.len() < data.len());
        let decoded = Codec::Lz4.decode(&encoded, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_decode_garbage_fails() {
        let err = Codec::Zstd.decode(b"not a zstd frame", 1024).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
    }

    #[test]
    fn test_lz4_decode_garbage_fails() {
        // Valid size prefix, invalid block body.
        let mut data = (1024u32).to_le_bytes().to_vec();
        data.extend_from_slice(&[0xff; 8]);
        assert!(Codec::Lz4.decode(&data, 1024).is_err());
    }

    // ---------------------------------------------------------------
    // Heuristic
    // ---------------------------------------------------------------

    #[test]
    fn test_small_payloads_skip_compression() {
        let cfg = CompressionConfig::balanced();
        let (codec, stored) = cfg.encode_for_entry("doc.txt", b"tiny").unwrap();
        assert_eq!(codec, Codec::None);
        assert_eq!(stored, b"tiny");
    }

    #[test]
    fn test_skip_extensions_stay_raw() {
        let cfg = CompressionConfig::balanced();
        let data = vec![b'x'; 4096];
        let (codec, stored) = cfg.encode_for_entry("photo.JPG", &data).unwrap();
        assert_eq!(codec, Codec::None);
        assert_eq!(stored, data);
    }

    #[test]
    fn test_compressible_payload_gets_codec() {
        let cfg = CompressionConfig::balanced();
        let data = vec![b'x'; 4096];
        let (codec, stored) = cfg.encode_for_entry("doc.txt", &data).unwrap();
        assert_eq!(codec, Codec::Zstd);
        assert!(stored.len() < data.len());
    }

    #[test]
    fn test_incompressible_payload_falls_back_to_raw() {
        // A pseudo-random buffer that zstd cannot shrink below 90%.
        let mut state = 0x12345678u32;
        let data: Vec<u8> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();
        let cfg = CompressionConfig::balanced();
        let (codec, stored) = cfg.encode_for_entry("doc.bin", &data).unwrap();
        assert_eq!(codec, Codec::None);
        assert_eq!(stored, data);
    }

    #[test]
    fn test_codec_none_config_never_tries() {
        let cfg = CompressionConfig::none();
        assert!(!cfg.should_try("doc.txt", 1 << 20));
    }

    #[test]
    fn test_profiles() {
        assert_eq!(CompressionConfig::balanced().codec, Codec::Zstd);
        assert_eq!(CompressionConfig::balanced().level, Some(5));
        assert_eq!(CompressionConfig::aggressive().level, Some(9));
        assert_eq!(CompressionConfig::speed().codec, Codec::Lz4);
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg: CompressionConfig = serde_json::from_str(r#"{"codec":"zstd"}"#).unwrap();
        assert_eq!(cfg.codec, Codec::Zstd);
        assert_eq!(cfg.min_size_bytes, 512);
        assert!((cfg.min_ratio - 0.90).abs() < f64::EPSILON);
        assert!(cfg.skip_extensions.contains("jpg"));
    }
}
