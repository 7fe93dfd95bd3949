pub mod sources;

use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    pub redis: Option<RedisConfig>,
    pub aggregation: AggregationConfig,
    pub lock: LockConfig,
    pub flush: FlushConfig,
    pub logging: LoggingConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Expiry applied to both the lock and the pending buffer.
    pub fn entry_ttl(&self) -> Duration {
        self.aggregation.entry_ttl()
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// How long related card events are collapsed into one notification.
    pub window: Duration,
    /// Added to the window to form the lock and buffer TTL.
    pub ttl_margin: Duration,
    pub key_prefix: String,
}

impl AggregationConfig {
    pub fn entry_ttl(&self) -> Duration {
        self.window + self.ttl_margin
    }
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Fire an in-process timer after the window.
    pub timer: bool,
    pub sweeper: SweeperConfig,
}

/// Periodic scan of the durable due index; picks up flushes whose timer was
/// lost with a crashed worker.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Extra delay past the due time before the sweeper claims a job, so the
    /// timer on the creating worker normally wins.
    pub grace: Duration,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
