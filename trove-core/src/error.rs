use thiserror::Error;

/// Failures talking to the coordination store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the collaborators the saga calls into.
#[derive(Error, Debug)]
pub enum DownstreamError {
    #[error("Card lookup failed: {0}")]
    CardLookup(String),

    #[error("Notification command failed: {0}")]
    Notification(String),
}

/// Internal error union of the saga. Never escapes
/// [`CardNotificationSaga::handle_event`](crate::saga::CardNotificationSaga::handle_event);
/// it is folded into a [`SagaOutcome`](crate::saga::SagaOutcome) there.
#[derive(Error, Debug)]
pub enum SagaError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("Pending aggregation at {key} is unreadable: {source}")]
    CorruptPending {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, SagaError>;
