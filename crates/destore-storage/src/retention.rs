//! Extended-retention overlay.
//!
//! Shards carry a default WORM window; a file whose retention gets extended
//! past it cannot be re-locked in place because shards are immutable. The
//! manager instead keeps a per-file overlay copy under a dedicated prefix:
//!
//! - **First extension (S0 → S1)**: read the payload out of its shard
//!   (bypassing the overlay probe), PUT it at the overlay key, set the
//!   object-lock retention. Action: `moved`.
//! - **Later extensions (S1)**: no copy; only the lock timestamp advances.
//!   Action: `updated`. Retention never moves backwards.
//!
//! The reader consults the overlay first, so the copy is authoritative from
//! the moment it exists. The original shard is never touched.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use destore_core::routing::date_dir;
use serde::Serialize;

use crate::backend::{Backend, LockMode};
use crate::error::{Error, Result};
use crate::retriever::FileStore;

/// Overlay object key: `<prefix>/<YYYYMMDD>/<uid>_<created_at RFC3339>.dat`.
pub fn overlay_key(prefix: &str, uid: &str, created_at: DateTime<Utc>) -> String {
    let date = date_dir(created_at);
    let iso = created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    format!("{prefix}/{date}/{uid}_{iso}.dat")
}

/// What `set_retention` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionAction {
    /// First extension: the payload was copied into the overlay.
    Moved,
    /// The overlay copy already existed; only its retention advanced.
    Updated,
}

/// Result of a retention call.
#[derive(Debug, Clone)]
pub struct RetentionOutcome {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub overlay_key: String,
    pub retention_until: DateTime<Utc>,
    pub action: RetentionAction,
    /// `Soft` when the back-end cannot enforce a real WORM lock.
    pub lock_mode: LockMode,
}

/// Copy-on-first-extend manager for the overlay prefix.
pub struct ExtendedRetentionManager {
    backend: Arc<dyn Backend>,
    prefix: String,
    /// Tolerated clock skew when checking that `retain_until` is in the future.
    skew: Duration,
}

impl ExtendedRetentionManager {
    pub fn new(backend: Arc<dyn Backend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            skew: Duration::seconds(5),
        }
    }

    /// Ensure `(uid, created_at)` is retained until at least `retain_until`.
    ///
    /// `source` provides the payload on first extension; it must read from
    /// the shard, not the overlay.
    pub async fn set_retention(
        &self,
        uid: &str,
        created_at: DateTime<Utc>,
        retain_until: DateTime<Utc>,
        source: &dyn FileStore,
    ) -> Result<RetentionOutcome> {
        if uid.is_empty() {
            return Err(Error::InvalidInput("uid must not be empty".to_string()));
        }
        if retain_until <= Utc::now() - self.skew {
            return Err(Error::InvalidInput(format!(
                "retain_until {} is in the past",
                retain_until.to_rfc3339()
            )));
        }

        let key = overlay_key(&self.prefix, uid, created_at);

        if self.backend.exists(&key).await? {
            // S1: the copy exists, only the lock moves - and only forward.
            if let Some(existing) = self.backend.object_lock_get(&key).await? {
                if retain_until < existing {
                    return Err(Error::InvalidInput(format!(
                        "retention cannot move backwards: {} < {}",
                        retain_until.to_rfc3339(),
                        existing.to_rfc3339()
                    )));
                }
            }
            let lock_mode = self.backend.object_lock_set(&key, retain_until).await?;
            tracing::info!(uid, overlay_key = %key, retain_until = %retain_until, "updated retention");
            return Ok(RetentionOutcome {
                uid: uid.to_string(),
                created_at,
                overlay_key: key,
                retention_until: retain_until,
                action: RetentionAction::Updated,
                lock_mode,
            });
        }

        // S0: copy the payload out of its shard, then lock the copy.
        let payload = source.read_from_shard(uid, created_at).await?;
        self.backend.put(&key, payload).await?;
        let lock_mode = self.backend.object_lock_set(&key, retain_until).await?;
        tracing::info!(uid, overlay_key = %key, retain_until = %retain_until, "moved file to extended retention");

        Ok(RetentionOutcome {
            uid: uid.to_string(),
            created_at,
            overlay_key: key,
            retention_until: retain_until,
            action: RetentionAction::Moved,
            lock_mode,
        })
    }
}
