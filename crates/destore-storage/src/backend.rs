//! Back-end abstraction over `object_store`.
//!
//! The writer and reader need a small capability set — whole-object put/get,
//! range get, head, delete, existence, and object-lock retention — and they
//! need it identically for a local directory, an S3 bucket, or an in-memory
//! store in tests. [`ObjectStoreBackend`] provides all of them on top of any
//! `object_store::ObjectStore`.
//!
//! Object lock: the `object_store` SDK has no retention call, so both
//! variants record retention in a sidecar object (`<key>.retention`, a small
//! JSON document). Read-path semantics are identical to a real WORM lock;
//! enforcement is not, which is why [`LockMode::Soft`] is reported back to
//! the caller.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{GetOptions, GetRange, ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How retention is enforced for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Back-end enforced WORM lock.
    Governance,
    /// Sidecar record only; honored by this store, not enforced by storage.
    Soft,
}

/// Result of a suffix-range read: the trailing bytes plus the total object
/// size recovered from the same response, saving a HEAD round trip.
#[derive(Debug, Clone)]
pub struct SuffixRead {
    pub bytes: Bytes,
    pub object_size: u64,
}

/// Storage operations the writer, reader, and retention manager require.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier, used to key the index cache across back-ends.
    fn id(&self) -> &str;

    /// Whole-object write. Atomic per object; replaces any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Whole-object write that succeeds silently if the key already exists.
    /// Used for content-addressed BigFile siblings.
    async fn put_if_absent(&self, key: &str, data: Bytes) -> Result<()>;

    /// Whole-object read.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Byte-range read, end exclusive. Returns exactly the requested bytes.
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes>;

    /// Read the last `len` bytes and the total object size in one request.
    async fn get_suffix(&self, key: &str, len: u64) -> Result<SuffixRead>;

    /// Object size in bytes.
    async fn head(&self, key: &str) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Record a retain-until timestamp for an object, returning the mode the
    /// back-end could actually provide.
    async fn object_lock_set(&self, key: &str, retain_until: DateTime<Utc>) -> Result<LockMode>;

    /// Current retain-until timestamp, if any retention was ever set.
    async fn object_lock_get(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RetentionRecord {
    mode: LockMode,
    retain_until: DateTime<Utc>,
}

fn retention_key(key: &str) -> String {
    format!("{key}.retention")
}

/// [`Backend`] implementation over any `object_store::ObjectStore`.
pub struct ObjectStoreBackend {
    id: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Wrap an already-built store.
    pub fn new(id: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            id: id.into(),
            store,
        }
    }

    /// Local filesystem rooted at `base_dir` (created if missing). Writes go
    /// through the store's staged-rename path, so publishes are atomic.
    pub fn local(base_dir: impl AsRef<std::path::Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)
            .map_err(|e| Error::Backend(format!("create {}: {e}", base_dir.display())))?;
        let store = LocalFileSystem::new_with_prefix(base_dir)
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(Self {
            id: format!("local://{}", base_dir.display()),
            store: Arc::new(store),
        })
    }

    /// S3-compatible bucket. Credentials and the default region come from the
    /// environment (the usual `AWS_*` variables); `endpoint` overrides for
    /// MinIO/localstack.
    pub fn s3(
        bucket: &str,
        prefix: Option<&str>,
        region: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        let s3 = builder.build().map_err(|e| Error::Backend(e.to_string()))?;

        let (id, store): (String, Arc<dyn ObjectStore>) = match prefix {
            Some(prefix) if !prefix.is_empty() => (
                format!("s3://{bucket}/{prefix}"),
                Arc::new(PrefixStore::new(s3, Path::from(prefix))),
            ),
            _ => (format!("s3://{bucket}"), Arc::new(s3)),
        };
        Ok(Self { id, store })
    }

    /// In-memory store for tests.
    pub fn memory(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: Arc::new(InMemory::new()),
        }
    }

    fn path(key: &str) -> Path {
        Path::from(key)
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&Self::path(key), PutPayload::from(data))
            .await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> Result<()> {
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        match self
            .store
            .put_opts(&Self::path(key), PutPayload::from(data.clone()), options)
            .await
        {
            Ok(_) => Ok(()),
            // Content-addressed keys carry identical bytes; an existing
            // object is already the write we wanted.
            Err(object_store::Error::AlreadyExists { .. }) => Ok(()),
            // Stores without conditional put overwrite idempotently.
            Err(object_store::Error::NotImplemented) => {
                self.store
                    .put(&Self::path(key), PutPayload::from(data))
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&Self::path(key)).await?;
        Ok(result.bytes().await?)
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        let bytes = self
            .store
            .get_range(&Self::path(key), range.start as usize..range.end as usize)
            .await?;
        Ok(bytes)
    }

    async fn get_suffix(&self, key: &str, len: u64) -> Result<SuffixRead> {
        let options = GetOptions {
            range: Some(GetRange::Suffix(len as usize)),
            ..Default::default()
        };
        let result = self.store.get_opts(&Self::path(key), options).await?;
        let object_size = result.meta.size as u64;
        let bytes = result.bytes().await?;
        Ok(SuffixRead { bytes, object_size })
    }

    async fn head(&self, key: &str) -> Result<u64> {
        let meta = self.store.head(&Self::path(key)).await?;
        Ok(meta.size as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Self::path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&Self::path(key)).await?;
        Ok(())
    }

    async fn object_lock_set(&self, key: &str, retain_until: DateTime<Utc>) -> Result<LockMode> {
        let record = RetentionRecord {
            mode: LockMode::Soft,
            retain_until,
        };
        let body = serde_json::to_vec(&record)
            .map_err(|e| Error::Backend(format!("encode retention record: {e}")))?;
        self.put(&retention_key(key), Bytes::from(body)).await?;
        Ok(LockMode::Soft)
    }

    async fn object_lock_get(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get(&retention_key(key)).await {
            Ok(body) => {
                let record: RetentionRecord = serde_json::from_slice(&body).map_err(|e| {
                    Error::Backend(format!("decode retention record for {key:?}: {e}"))
                })?;
                Ok(Some(record.retain_until))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
