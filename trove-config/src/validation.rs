use thiserror::Error;
use url::Url;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("aggregation window must be greater than zero")]
    ZeroWindow,
    #[error("lock max_attempts must be at least 1")]
    NoLockAttempts,
    #[error(
        "lock max_delay ({max_ms} ms) must not be smaller than base_delay ({base_ms} ms)"
    )]
    InvertedBackoff { base_ms: u128, max_ms: u128 },
    #[error("lock backoff_factor must be >= 1.0, got {0}")]
    ShrinkingBackoff(f64),
    #[error("invalid REDIS_URL: {reason}")]
    InvalidRedisUrl { reason: String },
    #[error("key prefix cannot be empty")]
    EmptyKeyPrefix,
    #[error("sweeper batch_size must be at least 1")]
    EmptySweepBatch,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.aggregation.window.is_zero() {
        return Err(ConfigGuardRailError::ZeroWindow);
    }

    if config.aggregation.key_prefix.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyKeyPrefix);
    }

    validate_lock(config)?;

    if let Some(redis) = &config.redis {
        validate_redis_url(&redis.url)?;
    } else if !config.dev_mode {
        warnings.push_with_hint(
            "REDIS_URL not configured; notification aggregation falls back to a process-local store",
            "Set REDIS_URL so that every worker shares locks and pending buffers",
        );
    }

    if config.flush.sweeper.enabled && config.flush.sweeper.batch_size == 0 {
        return Err(ConfigGuardRailError::EmptySweepBatch);
    }

    if !config.flush.timer && !config.flush.sweeper.enabled {
        warnings.push_with_hint(
            "Both the flush timer and the flush sweeper are disabled; pending notifications will only expire",
            "Enable TROVE_FLUSH_TIMER or TROVE_FLUSH_SWEEPER",
        );
    }

    if config.flush.sweeper.enabled
        && config.flush.sweeper.grace >= config.aggregation.ttl_margin
    {
        warnings.push_with_hint(
            "Sweeper grace is not shorter than the TTL margin; buffers may expire before the sweeper claims them",
            "Keep flush.sweeper.grace_ms below aggregation.ttl_margin_ms",
        );
    }

    Ok(warnings)
}

fn validate_lock(config: &Config) -> Result<(), ConfigGuardRailError> {
    let lock = &config.lock;

    if lock.max_attempts == 0 {
        return Err(ConfigGuardRailError::NoLockAttempts);
    }

    if lock.max_delay < lock.base_delay {
        return Err(ConfigGuardRailError::InvertedBackoff {
            base_ms: lock.base_delay.as_millis(),
            max_ms: lock.max_delay.as_millis(),
        });
    }

    if !(lock.backoff_factor >= 1.0) {
        return Err(ConfigGuardRailError::ShrinkingBackoff(lock.backoff_factor));
    }

    Ok(())
}

fn validate_redis_url(raw: &str) -> Result<(), ConfigGuardRailError> {
    let parsed = Url::parse(raw).map_err(|e| {
        ConfigGuardRailError::InvalidRedisUrl {
            reason: e.to_string(),
        }
    })?;

    match parsed.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(()),
        other => Err(ConfigGuardRailError::InvalidRedisUrl {
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}
