pub mod error;

use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::{
    constants::*,
    models::{
        AggregationConfig, Config, ConfigMetadata, FlushConfig, LockConfig,
        LoggingConfig, RedisConfig, SweeperConfig,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigWarnings},
};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![PathBuf::from("trove.toml"), PathBuf::from("config/trove.toml")]
});

/// Result of a successful load: the effective config plus any non-fatal
/// findings the caller should surface.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip `.env` handling entirely.
    pub skip_env_file: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
    env_override: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self {
            options,
            env_override: None,
        }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Use these environment values instead of reading the process
    /// environment. Implies `skip_env_file`.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env_override = Some(env);
        self.options.skip_env_file = true;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;

        let env_config = self
            .env_override
            .clone()
            .unwrap_or_else(EnvConfig::gather);

        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let mut warnings = ConfigWarnings::default();
        if file_config.is_none() {
            warnings.push_with_hint(
                "No trove.toml detected; using environment variables and defaults",
                "Create trove.toml or set TROVE_CONFIG_PATH to pin the notification settings",
            );
        }

        let config = compose_config(
            file_config.unwrap_or_default(),
            env_config,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        );

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.skip_env_file {
            return Ok(false);
        }

        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };

        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;

    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Merge sources with precedence env > file > defaults.
fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Config {
    let FileConfig {
        redis: file_redis,
        aggregation: file_aggregation,
        lock: file_lock,
        flush: file_flush,
        logging: file_logging,
        dev_mode: file_dev_mode,
    } = file;

    let redis = env
        .redis_url
        .clone()
        .map(|url| RedisConfig { url })
        .or_else(|| file_redis.map(|r| RedisConfig { url: r.url }));

    let aggregation = AggregationConfig {
        window: millis(
            env.aggregation_window_ms
                .or(file_aggregation.window_ms)
                .unwrap_or(DEFAULT_AGGREGATION_WINDOW_MS),
        ),
        ttl_margin: millis(
            env.ttl_margin_ms
                .or(file_aggregation.ttl_margin_ms)
                .unwrap_or(DEFAULT_TTL_MARGIN_MS),
        ),
        key_prefix: env
            .key_prefix
            .clone()
            .or(file_aggregation.key_prefix)
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
    };

    let lock = LockConfig {
        max_attempts: env
            .lock_max_attempts
            .or(file_lock.max_attempts)
            .unwrap_or(DEFAULT_LOCK_MAX_ATTEMPTS),
        base_delay: millis(
            env.lock_base_delay_ms
                .or(file_lock.base_delay_ms)
                .unwrap_or(DEFAULT_LOCK_BASE_DELAY_MS),
        ),
        backoff_factor: env
            .lock_backoff_factor
            .or(file_lock.backoff_factor)
            .unwrap_or(DEFAULT_LOCK_BACKOFF_FACTOR),
        max_delay: millis(
            env.lock_max_delay_ms
                .or(file_lock.max_delay_ms)
                .unwrap_or(DEFAULT_LOCK_MAX_DELAY_MS),
        ),
        max_jitter: millis(
            env.lock_max_jitter_ms
                .or(file_lock.max_jitter_ms)
                .unwrap_or(DEFAULT_LOCK_MAX_JITTER_MS),
        ),
    };

    let file_sweeper = file_flush.sweeper;
    let flush = FlushConfig {
        timer: env.flush_timer.or(file_flush.timer).unwrap_or(true),
        sweeper: SweeperConfig {
            enabled: env
                .flush_sweeper
                .or(file_sweeper.enabled)
                .unwrap_or(true),
            interval: millis(
                env.sweep_interval_ms
                    .or(file_sweeper.interval_ms)
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_MS),
            ),
            grace: millis(
                env.sweep_grace_ms
                    .or(file_sweeper.grace_ms)
                    .unwrap_or(DEFAULT_SWEEP_GRACE_MS),
            ),
            batch_size: env
                .sweep_batch_size
                .or(file_sweeper.batch_size)
                .unwrap_or(DEFAULT_SWEEP_BATCH_SIZE),
        },
    };

    let logging = LoggingConfig {
        filter: env
            .log_filter
            .clone()
            .or(file_logging.filter)
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
    };

    let dev_mode = env.dev_mode.or(file_dev_mode).unwrap_or(false);

    Config {
        redis,
        aggregation,
        lock,
        flush,
        logging,
        dev_mode,
        metadata,
    }
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}
