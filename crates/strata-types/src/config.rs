use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::storage::StorageClass;

/// Process-wide storage configuration.
///
/// Built once by the embedding service and handed to every component as an
/// `Arc<StoreConfig>`. Nothing in the core reads configuration from ambient
/// state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline applied to every metadata and blob backend call.
    pub call_timeout_ms: u64,
    /// Storage class used for new libraries and blocks when none is given.
    pub default_storage_class: StorageClass,
    /// How many times a mutation is re-planned after losing the head race.
    pub max_head_retries: u32,
    pub dedup: DedupConfig,
    pub retention: RetentionConfig,
    pub refcount: RefCountConfig,
    pub restore: RestoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            default_storage_class: StorageClass::Hot,
            max_head_retries: 3,
            dedup: DedupConfig::default(),
            retention: RetentionConfig::default(),
            refcount: RefCountConfig::default(),
            restore: RestoreConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, TypeError> {
        let config: Self = toml::from_str(s).map_err(|e| TypeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.call_timeout_ms == 0 {
            return Err(TypeError::Config("call_timeout_ms must be positive".into()));
        }
        if self.dedup.max_check_batch == 0 || self.dedup.max_check_concurrency == 0 {
            return Err(TypeError::Config("dedup limits must be positive".into()));
        }
        if self.refcount.max_attempts == 0 {
            return Err(TypeError::Config("refcount.max_attempts must be positive".into()));
        }
        if self.refcount.checkpoint_every == 0 || self.refcount.claim_batch == 0 {
            return Err(TypeError::Config(
                "refcount.checkpoint_every and refcount.claim_batch must be positive".into(),
            ));
        }
        if self.refcount.base_backoff_ms > self.refcount.max_backoff_ms {
            return Err(TypeError::Config(
                "refcount.base_backoff_ms exceeds refcount.max_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Limits on client-driven "which blocks do you already have" checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum number of block ids accepted in one check.
    pub max_check_batch: usize,
    /// Maximum number of existence lookups in flight at once.
    pub max_check_concurrency: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_check_batch: 10_000,
            max_check_concurrency: 20,
        }
    }
}

/// How long unreferenced data and history are kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Minimum time a block must sit at reference count zero before the
    /// sweeper may delete its bytes.
    pub block_grace_secs: u64,
    /// Interval between sweeper passes.
    pub sweep_interval_secs: u64,
    /// Version retention for new libraries, in days. `None` keeps all history.
    pub default_version_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            block_grace_secs: 7 * 24 * 3600,
            sweep_interval_secs: 3600,
            default_version_days: None,
        }
    }
}

impl RetentionConfig {
    pub fn block_grace(&self) -> Duration {
        Duration::from_secs(self.block_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Tuning for the durable reference-count task queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefCountConfig {
    /// Attempts before a task is dead-lettered.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How long a claimed task stays invisible to other workers.
    pub lease_ms: u64,
    /// Tasks claimed per worker poll.
    pub claim_batch: usize,
    /// Blocks applied between progress checkpoints.
    pub checkpoint_every: usize,
    /// Idle sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// How long block rows remember which task positions they applied. A
    /// task retried later than this may repeat its last unsaved batch.
    pub mark_retention_secs: u64,
}

impl Default for RefCountConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 500,
            max_backoff_ms: 5 * 60 * 1000,
            lease_ms: 60_000,
            claim_batch: 16,
            checkpoint_every: 256,
            poll_interval_ms: 1_000,
            mark_retention_secs: 30 * 24 * 3600,
        }
    }
}

impl RefCountConfig {
    /// Exponential backoff for the given (1-based) attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn mark_retention(&self) -> Duration {
        Duration::from_secs(self.mark_retention_secs)
    }
}

/// Tuning for archival restores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Interval between restore status polls.
    pub poll_interval_secs: u64,
    /// Days the archive backend keeps the restored copy available.
    pub restore_days: u32,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15 * 60,
            restore_days: 1,
        }
    }
}

impl RestoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = StoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dedup.max_check_batch, 10_000);
        assert_eq!(config.dedup.max_check_concurrency, 20);
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_takes_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            max_head_retries = 5
            default_storage_class = "cold"

            [retention]
            block_grace_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.max_head_retries, 5);
        assert_eq!(config.default_storage_class, StorageClass::Cold);
        assert_eq!(config.retention.block_grace(), Duration::from_secs(60));
        assert_eq!(config.retention.sweep_interval_secs, 3600);
        assert_eq!(config.refcount, RefCountConfig::default());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = StoreConfig::from_toml_str("call_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, TypeError::Config(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(StoreConfig::from_toml_str("max_head_retries = \"many\"").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let rc = RefCountConfig {
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(rc.backoff(1), Duration::from_millis(100));
        assert_eq!(rc.backoff(2), Duration::from_millis(200));
        assert_eq!(rc.backoff(4), Duration::from_millis(800));
        assert_eq!(rc.backoff(5), Duration::from_millis(1_000));
        assert_eq!(rc.backoff(60), Duration::from_millis(1_000));
    }
}
