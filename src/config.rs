use crate::domain::document::DocumentKind;
use crate::error::{BillingError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration, built once at startup and handed to every component.
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BillingConfig {
    pub scheduler: SchedulerConfig,
    pub workers: WorkerConfig,
    pub locks: LockConfig,
    pub documents: DocumentConfig,
    pub transactions: TransactionConfig,
    pub queue: QueueConfig,
    pub processors: ProcessorsConfig,
    pub lock_backend: Option<LockBackendConfig>,
}

impl BillingConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.count == 0 {
            return Err(BillingError::ConfigError(
                "workers.count must be at least 1".to_string(),
            ));
        }
        if self.transactions.max_attempts == 0 || self.documents.render_max_attempts == 0 {
            return Err(BillingError::ConfigError(
                "attempt limits must be at least 1".to_string(),
            ));
        }
        if self.locks.ttl_secs == 0 {
            return Err(BillingError::ConfigError(
                "locks.ttl_secs must be positive".to_string(),
            ));
        }
        if !self
            .processors
            .enabled
            .contains(&self.transactions.default_processor)
        {
            return Err(BillingError::ConfigError(format!(
                "default processor {:?} is not enabled",
                self.transactions.default_processor
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub max_periods_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_periods_per_tick: 12,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub poll_interval_ms: u64,
    pub max_job_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    pub busy_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            poll_interval_ms: 250,
            max_job_attempts: 5,
            retry_base_secs: 2,
            retry_max_secs: 300,
            busy_delay_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn busy_delay(&self) -> Duration {
        Duration::from_millis(self.busy_delay_ms)
    }

    /// Exponential backoff for the given attempt number (1-based), capped.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let secs = self
            .retry_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            key_prefix: "billrun:lock:".to_string(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// TTL for an operation bounded by `limit`: the lease must outlive the call.
    pub fn ttl_for(&self, limit: Duration) -> Duration {
        self.ttl().max(limit * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub kind: DocumentKind,
    pub due_days: i64,
    pub auto_issue: bool,
    pub storage_prefix: String,
    pub render_time_limit_secs: u64,
    pub render_max_attempts: u32,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            kind: DocumentKind::Invoice,
            due_days: 5,
            auto_issue: true,
            storage_prefix: "documents/".to_string(),
            render_time_limit_secs: 60,
            render_max_attempts: 3,
        }
    }
}

impl DocumentConfig {
    pub fn render_time_limit(&self) -> Duration {
        Duration::from_secs(self.render_time_limit_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub auto_create: bool,
    pub default_processor: String,
    pub settle_time_limit_secs: u64,
    pub max_attempts: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            auto_create: true,
            default_processor: "manual".to_string(),
            settle_time_limit_secs: 5,
            max_attempts: 5,
        }
    }
}

impl TransactionConfig {
    pub fn settle_time_limit(&self) -> Duration {
        Duration::from_secs(self.settle_time_limit_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub dedup_timeout_secs: u64,
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_timeout_secs: 60 * 60,
            visibility_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    pub enabled: Vec<String>,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["manual".to_string()],
        }
    }
}

/// Already resolved connection parameters of the Redis lock backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockBackendConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
}

fn default_redis_port() -> u16 {
    6379
}
