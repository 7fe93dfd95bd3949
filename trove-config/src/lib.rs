//! Shared configuration library for Trove.
//!
//! Settings for the card notification workers are layered from a `.env`
//! file, an optional `trove.toml`, and process environment variables (in
//! increasing precedence). Loading finishes with guard rails that reject
//! settings the aggregation saga cannot run with and collect warnings for
//! settings it can run with but probably should not.

pub mod constants;
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    AggregationConfig, Config, ConfigMetadata, FlushConfig, LockConfig,
    LoggingConfig, RedisConfig, SweeperConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
