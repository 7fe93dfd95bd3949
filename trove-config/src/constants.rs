//! Defaults shared by the loader, guard rails and the notification runtime.

pub const DEFAULT_KEY_PREFIX: &str = "trove:notif";

pub const DEFAULT_AGGREGATION_WINDOW_MS: u64 = 3_000;
pub const DEFAULT_TTL_MARGIN_MS: u64 = 5_000;

pub const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 15;
pub const DEFAULT_LOCK_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_LOCK_BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_LOCK_MAX_DELAY_MS: u64 = 2_000;
pub const DEFAULT_LOCK_MAX_JITTER_MS: u64 = 50;

pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_GRACE_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

pub const DEFAULT_LOG_FILTER: &str = "info,trove_core=info";
