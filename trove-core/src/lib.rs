//! # Trove Core
//!
//! Card notification aggregation for Trove.
//!
//! Several workers consume card events concurrently and share nothing but a
//! coordination store (Redis in production). [`CardNotificationSaga`]
//! collapses the library and collection additions one actor makes to one
//! card within an aggregation window into a single notification for the
//! owner of the card it was saved via, and withdraws those notifications
//! when the card is removed.
//!
//! ## Modules
//!
//! - [`ports`]: the coordination store, card directory, notification
//!   commands and clock the saga depends on
//! - [`aggregation`]: aggregation keys and the buffered pending state
//! - [`lock`]: per-key distributed lock with jittered retry
//! - [`flush`]: the durable due index, flush jobs and the sweeper
//! - [`saga`]: event handling, flush and cancellation
//! - [`infra`]: Redis and in-memory store adapters
//! - [`runtime`]: wiring from [`trove_config::Config`]
//! - [`admin`]: inspection and purge of stored state for operators

pub mod admin;
pub mod aggregation;
pub mod error;
pub mod flush;
pub mod infra;
pub mod lock;
pub mod ports;
pub mod runtime;
pub mod saga;

pub use aggregation::{AggregationKey, PendingAggregation, StoreKeys};
pub use error::{DownstreamError, SagaError, StoreError};
pub use flush::{FlushJob, FlushScheduler, FlushSweeper};
pub use lock::{DistributedLock, LockGuard, RetryPolicy};
pub use runtime::{NotificationRuntime, connect_store};
pub use saga::{
    CardNotificationSaga, FlushOutcome, IgnoreReason, SagaOutcome, SagaPorts,
    SagaSettings, SweepReport,
};
