//! Multi-zone retrieval dispatch.
//!
//! A zone owns a contiguous, inclusive range of shard indices and a back-end
//! holding exactly those shards. The dispatcher validates at construction
//! that the zones tile `[0, 2^n_bits)` with no overlap and no gap, then
//! routes every read to the owning zone's engine by binary search.
//!
//! Zones do not mirror each other: an outage takes down only the indices the
//! failed zone owns, and there is no cross-zone fallback.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use destore_core::routing;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retriever::{FileStore, ShardRetriever};

/// Inclusive shard-index range owned by one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRange {
    pub start: u32,
    pub end: u32,
}

impl ZoneRange {
    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index <= self.end
    }
}

/// One configured zone: a name for diagnostics, its range, and its engine.
pub struct Zone {
    pub name: String,
    pub range: ZoneRange,
    pub retriever: Arc<ShardRetriever>,
}

/// Routes reads across zones by shard index.
pub struct MultiZoneRetriever {
    n_bits: u8,
    /// Sorted by `range.start`; validated contiguous at construction.
    zones: Vec<Zone>,
}

impl std::fmt::Debug for MultiZoneRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiZoneRetriever")
            .field("n_bits", &self.n_bits)
            .field("zones", &self.zones.len())
            .finish()
    }
}

impl MultiZoneRetriever {
    /// Build a dispatcher, validating full coverage of `[0, 2^n_bits)`.
    /// An illegal zone map is caller input and fails as `InvalidInput`.
    pub fn new(n_bits: u8, mut zones: Vec<Zone>) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::InvalidInput(
                "zone map has no zones".to_string(),
            ));
        }
        let max_index = (1u32 << n_bits) - 1;
        zones.sort_by_key(|z| z.range.start);

        let mut expected_start = 0u32;
        for (i, zone) in zones.iter().enumerate() {
            if zone.range.start > zone.range.end {
                return Err(Error::InvalidInput(format!(
                    "zone map: zone {:?} has start {} > end {}",
                    zone.name, zone.range.start, zone.range.end
                )));
            }
            if zone.range.start != expected_start {
                let kind = if zone.range.start < expected_start {
                    "overlaps previous zone"
                } else {
                    "leaves a gap"
                };
                return Err(Error::InvalidInput(format!(
                    "zone map: zone {:?} starting at {} {kind} (expected start {})",
                    zone.name, zone.range.start, expected_start
                )));
            }
            if zone.range.end > max_index {
                return Err(Error::InvalidInput(format!(
                    "zone map: zone {:?} ends at {} beyond max index {max_index}",
                    zone.name, zone.range.end
                )));
            }
            if i == zones.len() - 1 && zone.range.end != max_index {
                return Err(Error::InvalidInput(format!(
                    "zone map covers only up to {} of {max_index}",
                    zone.range.end
                )));
            }
            expected_start = zone.range.end.saturating_add(1);
        }

        Ok(Self { n_bits, zones })
    }

    pub fn n_bits(&self) -> u8 {
        self.n_bits
    }

    pub fn zones(&self) -> impl Iterator<Item = (&str, ZoneRange)> {
        self.zones.iter().map(|z| (z.name.as_str(), z.range))
    }

    /// Owning zone for a shard index. Coverage is total, so this cannot miss
    /// for any index the router can produce.
    fn zone_for(&self, shard_index: u32) -> &Zone {
        let pos = self
            .zones
            .partition_point(|z| z.range.start <= shard_index)
            .saturating_sub(1);
        &self.zones[pos]
    }

    fn route(&self, uid: &str, created_at: DateTime<Utc>) -> Result<&Zone> {
        let loc = routing::locate(uid, created_at, self.n_bits)?;
        let zone = self.zone_for(loc.shard_index);
        tracing::debug!(
            uid,
            shard_index = loc.shard_index,
            zone = %zone.name,
            "dispatching to zone"
        );
        Ok(zone)
    }
}

#[async_trait]
impl FileStore for MultiZoneRetriever {
    async fn get_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes> {
        self.route(uid, created_at)?
            .retriever
            .get_file(uid, created_at)
            .await
    }

    async fn has_file(&self, uid: &str, created_at: DateTime<Utc>) -> Result<bool> {
        self.route(uid, created_at)?
            .retriever
            .has_file(uid, created_at)
            .await
    }

    async fn read_from_shard(&self, uid: &str, created_at: DateTime<Utc>) -> Result<Bytes> {
        self.route(uid, created_at)?
            .retriever
            .read_from_shard(uid, created_at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, ObjectStoreBackend};
    use crate::cache::IndexCache;
    use crate::config::StoreConfig;

    fn zone(name: &str, start: u32, end: u32) -> Zone {
        let config = StoreConfig::default();
        let backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory(name));
        let cache = Arc::new(IndexCache::new(&config.cache));
        Zone {
            name: name.to_string(),
            range: ZoneRange { start, end },
            retriever: Arc::new(ShardRetriever::new(backend, &config, cache)),
        }
    }

    #[test]
    fn test_full_coverage_accepted() {
        let zones = vec![zone("a", 0, 127), zone("b", 128, 255)];
        let multi = MultiZoneRetriever::new(8, zones).unwrap();
        assert_eq!(multi.zones().count(), 2);
    }

    #[test]
    fn test_single_zone_covering_everything() {
        assert!(MultiZoneRetriever::new(8, vec![zone("all", 0, 255)]).is_ok());
    }

    #[test]
    fn test_every_index_maps_to_exactly_one_zone() {
        let zones = vec![zone("a", 0, 63), zone("b", 64, 64), zone("c", 65, 255)];
        let multi = MultiZoneRetriever::new(8, zones).unwrap();
        for index in 0u32..=255 {
            let matching: Vec<_> = multi
                .zones()
                .filter(|(_, range)| range.contains(index))
                .collect();
            assert_eq!(matching.len(), 1, "index {index}");
            assert_eq!(multi.zone_for(index).name, matching[0].0);
        }
    }

    #[test]
    fn test_gap_rejected() {
        let err = MultiZoneRetriever::new(8, vec![zone("a", 0, 100), zone("b", 102, 255)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = MultiZoneRetriever::new(8, vec![zone("a", 0, 128), zone("b", 128, 255)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_missing_head_rejected() {
        let err = MultiZoneRetriever::new(8, vec![zone("a", 1, 255)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_short_tail_rejected() {
        let err = MultiZoneRetriever::new(8, vec![zone("a", 0, 200)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_range_beyond_index_space_rejected() {
        let err = MultiZoneRetriever::new(4, vec![zone("a", 0, 255)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = MultiZoneRetriever::new(8, vec![zone("a", 10, 5)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_empty_zone_list_rejected() {
        let err = MultiZoneRetriever::new(8, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
