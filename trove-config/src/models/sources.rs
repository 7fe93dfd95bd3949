use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub aggregation: FileAggregationConfig,
    #[serde(default)]
    pub lock: FileLockConfig,
    #[serde(default)]
    pub flush: FileFlushConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAggregationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_margin_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_jitter_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFlushConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<bool>,
    #[serde(default)]
    pub sweeper: FileSweeperConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSweeperConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub aggregation_window_ms: Option<u64>,
    pub ttl_margin_ms: Option<u64>,
    pub lock_max_attempts: Option<u32>,
    pub lock_base_delay_ms: Option<u64>,
    pub lock_backoff_factor: Option<f64>,
    pub lock_max_delay_ms: Option<u64>,
    pub lock_max_jitter_ms: Option<u64>,
    pub flush_timer: Option<bool>,
    pub flush_sweeper: Option<bool>,
    pub sweep_interval_ms: Option<u64>,
    pub sweep_grace_ms: Option<u64>,
    pub sweep_batch_size: Option<usize>,
    pub log_filter: Option<String>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |name: &str| -> Option<u64> {
            lookup(name).and_then(|s| s.trim().parse().ok())
        };
        let flag = |name: &str| lookup(name).and_then(|raw| parse_bool(&raw));

        Self {
            config_path: lookup("TROVE_CONFIG_PATH").map(PathBuf::from),
            redis_url: lookup("REDIS_URL"),
            key_prefix: lookup("TROVE_KEY_PREFIX"),
            aggregation_window_ms: parse_u64("TROVE_AGGREGATION_WINDOW_MS"),
            ttl_margin_ms: parse_u64("TROVE_TTL_MARGIN_MS"),
            lock_max_attempts: lookup("TROVE_LOCK_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok()),
            lock_base_delay_ms: parse_u64("TROVE_LOCK_BASE_DELAY_MS"),
            lock_backoff_factor: lookup("TROVE_LOCK_BACKOFF_FACTOR")
                .and_then(|s| s.trim().parse().ok()),
            lock_max_delay_ms: parse_u64("TROVE_LOCK_MAX_DELAY_MS"),
            lock_max_jitter_ms: parse_u64("TROVE_LOCK_MAX_JITTER_MS"),
            flush_timer: flag("TROVE_FLUSH_TIMER"),
            flush_sweeper: flag("TROVE_FLUSH_SWEEPER"),
            sweep_interval_ms: parse_u64("TROVE_FLUSH_SWEEP_INTERVAL_MS"),
            sweep_grace_ms: parse_u64("TROVE_FLUSH_SWEEP_GRACE_MS"),
            sweep_batch_size: lookup("TROVE_FLUSH_SWEEP_BATCH")
                .and_then(|s| s.trim().parse().ok()),
            log_filter: lookup("RUST_LOG"),
            dev_mode: flag("TROVE_DEV_MODE"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
