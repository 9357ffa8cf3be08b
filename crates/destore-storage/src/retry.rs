//! Retry policy for idempotent back-end reads.
//!
//! GET and HEAD are safe to repeat, so transient back-end failures get a
//! short exponential backoff before surfacing. Write-path errors are never
//! retried here — the caller retries the whole shard.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Exponential backoff for idempotent reads: 50 ms base, doubling, capped at
/// 2 s, three attempts total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; the first error surfaces.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(u64::from(self.factor).saturating_pow(attempt));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    /// Only errors with `is_retryable()` are retried.
    pub async fn run<T, Fut>(&self, what: &str, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let backoff = self.delay_for(attempt);
                    tracing::warn!(
                        what,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying backend read"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_factor() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}
