//! End-to-end tests for the pack → retrieve flow, including the range-read
//! budget the read protocol promises: three range GETs cold, one warm.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use destore_core::CompressionConfig;
use destore_storage::{
    pack, Backend, Error, FileStore, FileToPack, IndexCache, MultiZoneRetriever,
    ObjectStoreBackend, ShardRetriever, StoreConfig, SuffixRead, Zone, ZoneRange,
};

/// Wraps a backend and counts the operations the read protocol issues.
struct CountingBackend {
    inner: Arc<dyn Backend>,
    range_gets: AtomicUsize,
    whole_gets: AtomicUsize,
}

impl CountingBackend {
    fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            range_gets: AtomicUsize::new(0),
            whole_gets: AtomicUsize::new(0),
        }
    }

    fn range_gets(&self) -> usize {
        self.range_gets.load(Ordering::SeqCst)
    }

    fn whole_gets(&self) -> usize {
        self.whole_gets.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.range_gets.store(0, Ordering::SeqCst);
        self.whole_gets.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for CountingBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn put(&self, key: &str, data: Bytes) -> destore_storage::Result<()> {
        self.inner.put(key, data).await
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> destore_storage::Result<()> {
        self.inner.put_if_absent(key, data).await
    }

    async fn get(&self, key: &str) -> destore_storage::Result<Bytes> {
        self.whole_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> destore_storage::Result<Bytes> {
        self.range_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_range(key, range).await
    }

    async fn get_suffix(&self, key: &str, len: u64) -> destore_storage::Result<SuffixRead> {
        self.range_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_suffix(key, len).await
    }

    async fn head(&self, key: &str) -> destore_storage::Result<u64> {
        self.inner.head(key).await
    }

    async fn exists(&self, key: &str) -> destore_storage::Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> destore_storage::Result<()> {
        self.inner.delete(key).await
    }

    async fn object_lock_set(
        &self,
        key: &str,
        retain_until: DateTime<Utc>,
    ) -> destore_storage::Result<destore_storage::LockMode> {
        self.inner.object_lock_set(key, retain_until).await
    }

    async fn object_lock_get(
        &self,
        key: &str,
    ) -> destore_storage::Result<Option<DateTime<Utc>>> {
        self.inner.object_lock_get(key).await
    }
}

/// A zone whose back-end is down: every operation fails.
struct FailingBackend;

#[async_trait]
impl Backend for FailingBackend {
    fn id(&self) -> &str {
        "failing"
    }

    async fn put(&self, _: &str, _: Bytes) -> destore_storage::Result<()> {
        Err(Error::Backend("zone down".into()))
    }

    async fn put_if_absent(&self, _: &str, _: Bytes) -> destore_storage::Result<()> {
        Err(Error::Backend("zone down".into()))
    }

    async fn get(&self, _: &str) -> destore_storage::Result<Bytes> {
        Err(Error::Backend("zone down".into()))
    }

    async fn get_range(&self, _: &str, _: Range<u64>) -> destore_storage::Result<Bytes> {
        Err(Error::Backend("zone down".into()))
    }

    async fn get_suffix(&self, _: &str, _: u64) -> destore_storage::Result<SuffixRead> {
        Err(Error::Backend("zone down".into()))
    }

    async fn head(&self, _: &str) -> destore_storage::Result<u64> {
        Err(Error::Backend("zone down".into()))
    }

    async fn exists(&self, _: &str) -> destore_storage::Result<bool> {
        Err(Error::Backend("zone down".into()))
    }

    async fn delete(&self, _: &str) -> destore_storage::Result<()> {
        Err(Error::Backend("zone down".into()))
    }

    async fn object_lock_set(
        &self,
        _: &str,
        _: DateTime<Utc>,
    ) -> destore_storage::Result<destore_storage::LockMode> {
        Err(Error::Backend("zone down".into()))
    }

    async fn object_lock_get(&self, _: &str) -> destore_storage::Result<Option<DateTime<Utc>>> {
        Err(Error::Backend("zone down".into()))
    }
}

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
}

fn config() -> StoreConfig {
    StoreConfig {
        compression: CompressionConfig::none(),
        ..StoreConfig::default()
    }
}

fn retriever_no_retry(backend: Arc<dyn Backend>, config: &StoreConfig) -> ShardRetriever {
    let mut config = config.clone();
    config.retry.max_attempts = 1;
    let cache = Arc::new(IndexCache::new(&config.cache));
    ShardRetriever::new(backend, &config, cache)
}

// ---------------------------------------------------------------
// Scenario: pack three tiny files, read back one in three ranges
// ---------------------------------------------------------------

#[tokio::test]
async fn test_pack_three_tiny_files_and_read_one() {
    let config = config();
    let inner: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));
    let result = pack(
        vec![
            FileToPack::from_bytes("uid-1", ts(), Bytes::from_static(b"a")),
            FileToPack::from_bytes("uid-2", ts(), Bytes::from_static(b"bb")),
            FileToPack::from_bytes("uid-3", ts(), Bytes::from_static(b"ccc")),
        ],
        &config,
        inner.clone(),
    )
    .await
    .unwrap();

    // All three route to 20240115; one shard per distinct hex slot, each
    // using the base key form.
    for shard in &result.shards {
        assert!(shard.object_key.starts_with("20240115/"));
        assert!(!shard.object_key.contains('_'));
    }

    let counting = Arc::new(CountingBackend::new(inner));
    let retriever = retriever_no_retry(counting.clone(), &config);

    let bytes = retriever.get_file("uid-2", ts()).await.unwrap();
    assert_eq!(bytes, &b"bb"[..]);
    assert_eq!(
        counting.range_gets(),
        3,
        "cold read must be exactly footer + index + payload"
    );
    assert_eq!(counting.whole_gets(), 0);
}

// ---------------------------------------------------------------
// Scenario: cache effect on the range-read budget
// ---------------------------------------------------------------

#[tokio::test]
async fn test_cache_effect_on_read_budget() {
    let config = config();
    let inner: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));
    // Two files in the same shard: same uid-prefix trick is not needed, just
    // reuse one uid so both land in one (date_dir, shard_hex) group.
    pack(
        vec![
            FileToPack::from_bytes("same-shard", ts(), Bytes::from_static(b"u1-payload")),
            FileToPack {
                meta: Some(Bytes::from_static(b"2nd")),
                ..FileToPack::from_bytes("same-shard", ts(), Bytes::from_static(b"u2-payload"))
            },
        ],
        &config,
        inner.clone(),
    )
    .await
    .unwrap();

    let counting = Arc::new(CountingBackend::new(inner));
    let retriever = retriever_no_retry(counting.clone(), &config);

    // Cold: three ranges.
    retriever.get_file("same-shard", ts()).await.unwrap();
    assert_eq!(counting.range_gets(), 3);

    // Warm: payload only.
    counting.reset();
    retriever.get_file("same-shard", ts()).await.unwrap();
    assert_eq!(counting.range_gets(), 1);

    // Evicted: cold again.
    let loc = destore_core::locate("same-shard", ts(), config.n_bits).unwrap();
    retriever.evict_cached_index(&loc.object_key).await;
    counting.reset();
    retriever.get_file("same-shard", ts()).await.unwrap();
    assert_eq!(counting.range_gets(), 3);
}

// ---------------------------------------------------------------
// Scenario: split by size, everything stays readable
// ---------------------------------------------------------------

#[tokio::test]
async fn test_split_shards_remain_readable() {
    let mut config = config();
    config.max_shard_size_bytes = 4 * 1024; // force splits
    let backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));

    // 40 payloads of 1 KiB in one routing group.
    let files: Vec<_> = (0..40)
        .map(|i| {
            let mut f = FileToPack::from_bytes(
                "split-group",
                ts(),
                Bytes::from(vec![i as u8; 1024]),
            );
            f.meta = Some(Bytes::from(format!("{i}")));
            f
        })
        .collect();
    let result = pack(files, &config, backend.clone()).await.unwrap();

    assert!(result.shards.len() >= 10, "got {} shards", result.shards.len());
    assert!(result.failures.is_empty());
    for (i, shard) in result.shards.iter().enumerate() {
        assert_eq!(shard.object_key, shard.shard_key.split_key(i));
    }

    // Every input byte is on the backend: shard sizes sum to payload + frame.
    let payload_total: u64 = 40 * 1024;
    assert!(result.total_bytes_written() > payload_total);

    // The retriever probes split suffixes and finds the last write.
    let retriever = retriever_no_retry(backend, &config);
    let bytes = retriever.get_file("split-group", ts()).await.unwrap();
    assert_eq!(bytes, vec![39u8; 1024], "duplicate uid resolves to the last write");
}

// ---------------------------------------------------------------
// Scenario: BigFile externalization
// ---------------------------------------------------------------

#[tokio::test]
async fn test_bigfile_externalization_end_to_end() {
    let mut config = config();
    config.bigfile_threshold_bytes = 1024 * 1024;
    let inner: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));

    let big = Bytes::from(vec![0x42; 2 * 1024 * 1024]);
    let result = pack(
        vec![FileToPack::from_bytes("big-uid", ts(), big.clone())],
        &config,
        inner.clone(),
    )
    .await
    .unwrap();

    // The shard holds only frame + index: far smaller than the payload.
    assert_eq!(result.shards.len(), 1);
    assert!(result.shards[0].bytes_written < 1024);
    let hash = &result.shards[0].bigfile_hashes[0];
    assert!(inner.exists(&format!("_bigFiles/{hash}")).await.unwrap());

    // Reading issues footer + index on the shard plus one whole-object GET.
    let counting = Arc::new(CountingBackend::new(inner));
    let retriever = retriever_no_retry(counting.clone(), &config);
    let bytes = retriever.get_file("big-uid", ts()).await.unwrap();
    assert_eq!(bytes, big);
    assert_eq!(counting.range_gets(), 2);
    assert_eq!(counting.whole_gets(), 1);
}

// ---------------------------------------------------------------
// Scenario: multi-zone dispatch and isolation
// ---------------------------------------------------------------

fn uid_in_range(range: &ZoneRange, n_bits: u8) -> String {
    for i in 0.. {
        let uid = format!("zone-probe-{i}");
        let index = destore_core::locate(&uid, ts(), n_bits).unwrap().shard_index;
        if range.contains(index) {
            return uid;
        }
    }
    unreachable!()
}

#[tokio::test]
async fn test_multi_zone_dispatch_and_isolation() {
    let config = config();
    let zone_b_backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("zone-b"));

    let range_a = ZoneRange { start: 0, end: 127 };
    let range_b = ZoneRange { start: 128, end: 255 };
    let uid_a = uid_in_range(&range_a, config.n_bits);
    let uid_b = uid_in_range(&range_b, config.n_bits);

    // Zone B holds its uid; zone A is down.
    pack(
        vec![FileToPack::from_bytes(uid_b.clone(), ts(), Bytes::from_static(b"zone-b data"))],
        &config,
        zone_b_backend.clone(),
    )
    .await
    .unwrap();

    let zone_a = Zone {
        name: "zone-a".to_string(),
        range: range_a,
        retriever: Arc::new(retriever_no_retry(Arc::new(FailingBackend), &config)),
    };
    let zone_b = Zone {
        name: "zone-b".to_string(),
        range: range_b,
        retriever: Arc::new(retriever_no_retry(zone_b_backend, &config)),
    };
    let multi = MultiZoneRetriever::new(config.n_bits, vec![zone_a, zone_b]).unwrap();

    // B-owned reads are unaffected by A's outage.
    let bytes = multi.get_file(&uid_b, ts()).await.unwrap();
    assert_eq!(bytes, &b"zone-b data"[..]);

    // A-owned reads surface the backend failure.
    let err = multi.get_file(&uid_a, ts()).await.unwrap_err();
    assert!(matches!(err, Error::Backend(_)), "got {err:?}");
}

// ---------------------------------------------------------------
// Short range reads are retried, then surface as a backend error
// ---------------------------------------------------------------

/// Delegates to a real backend but truncates every range response.
struct ShortRangeBackend {
    inner: Arc<dyn Backend>,
    range_gets: AtomicUsize,
}

#[async_trait]
impl Backend for ShortRangeBackend {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn put(&self, key: &str, data: Bytes) -> destore_storage::Result<()> {
        self.inner.put(key, data).await
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> destore_storage::Result<()> {
        self.inner.put_if_absent(key, data).await
    }

    async fn get(&self, key: &str) -> destore_storage::Result<Bytes> {
        self.inner.get(key).await
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> destore_storage::Result<Bytes> {
        self.range_gets.fetch_add(1, Ordering::SeqCst);
        let bytes = self.inner.get_range(key, range).await?;
        Ok(bytes.slice(0..bytes.len().saturating_sub(1)))
    }

    async fn get_suffix(&self, key: &str, len: u64) -> destore_storage::Result<SuffixRead> {
        self.inner.get_suffix(key, len).await
    }

    async fn head(&self, key: &str) -> destore_storage::Result<u64> {
        self.inner.head(key).await
    }

    async fn exists(&self, key: &str) -> destore_storage::Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> destore_storage::Result<()> {
        self.inner.delete(key).await
    }

    async fn object_lock_set(
        &self,
        key: &str,
        retain_until: DateTime<Utc>,
    ) -> destore_storage::Result<destore_storage::LockMode> {
        self.inner.object_lock_set(key, retain_until).await
    }

    async fn object_lock_get(
        &self,
        key: &str,
    ) -> destore_storage::Result<Option<DateTime<Utc>>> {
        self.inner.object_lock_get(key).await
    }
}

#[tokio::test]
async fn test_short_range_reads_retry_then_fail_as_backend_error() {
    let mut config = config();
    config.retry.base_delay_ms = 1;
    config.retry.max_attempts = 2;
    let inner: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));
    pack(
        vec![FileToPack::from_bytes("uid", ts(), Bytes::from_static(b"payload"))],
        &config,
        inner.clone(),
    )
    .await
    .unwrap();

    let short = Arc::new(ShortRangeBackend {
        inner,
        range_gets: AtomicUsize::new(0),
    });
    let cache = Arc::new(IndexCache::new(&config.cache));
    let retriever = ShardRetriever::new(short.clone(), &config, cache);

    let err = retriever.get_file("uid", ts()).await.unwrap_err();
    assert!(matches!(err, Error::Backend(_)), "got {err:?}");
    // The first range read (the index) was attempted, retried once, then
    // surfaced.
    assert_eq!(short.range_gets.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------
// Round-trip with every codec through the full stack
// ---------------------------------------------------------------

#[tokio::test]
async fn test_roundtrip_all_codecs() {
    for compression in [
        CompressionConfig::none(),
        CompressionConfig::balanced(),
        CompressionConfig::aggressive(),
        CompressionConfig::speed(),
    ] {
        let config = StoreConfig {
            compression,
            ..StoreConfig::default()
        };
        let backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));

        let originals: Vec<(String, Bytes)> = (0..20)
            .map(|i| {
                let uid = format!("doc-{i:03}.txt");
                let payload = Bytes::from(
                    format!("document {i} ").repeat(100 + i).into_bytes(),
                );
                (uid, payload)
            })
            .collect();

        let files = originals
            .iter()
            .map(|(uid, payload)| FileToPack::from_bytes(uid.clone(), ts(), payload.clone()))
            .collect();
        let result = pack(files, &config, backend.clone()).await.unwrap();
        assert!(result.failures.is_empty());

        let retriever = retriever_no_retry(backend, &config);
        for (uid, payload) in &originals {
            let bytes = retriever.get_file(uid, ts()).await.unwrap();
            assert_eq!(&bytes, payload, "uid {uid} did not round-trip");
            assert!(retriever.has_file(uid, ts()).await.unwrap());
        }
        assert!(!retriever.has_file("never-packed", ts()).await.unwrap());
    }
}

// ---------------------------------------------------------------
// Local filesystem backend end-to-end
// ---------------------------------------------------------------

#[tokio::test]
async fn test_local_filesystem_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = config();
    let backend: Arc<dyn Backend> =
        Arc::new(ObjectStoreBackend::local(dir.path().join("des")).unwrap());

    pack(
        vec![FileToPack::from_bytes("fs-uid", ts(), Bytes::from_static(b"on disk"))],
        &config,
        backend.clone(),
    )
    .await
    .unwrap();

    let retriever = retriever_no_retry(backend, &config);
    assert_eq!(
        retriever.get_file("fs-uid", ts()).await.unwrap(),
        &b"on disk"[..]
    );
}

// ---------------------------------------------------------------
// Deadline behavior: callers can bound any read with a timeout
// ---------------------------------------------------------------

#[tokio::test]
async fn test_read_respects_caller_deadline() {
    let config = config();
    let backend: Arc<dyn Backend> = Arc::new(ObjectStoreBackend::memory("mem"));
    pack(
        vec![FileToPack::from_bytes("quick", ts(), Bytes::from_static(b"x"))],
        &config,
        backend.clone(),
    )
    .await
    .unwrap();

    let retriever = retriever_no_retry(backend, &config);
    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        retriever.get_file("quick", ts()),
    )
    .await
    .expect("in-memory read finishes well inside the deadline");
    assert!(result.is_ok());
}
