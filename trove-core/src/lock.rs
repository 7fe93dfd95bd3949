//! Short-lived mutual exclusion per aggregation key.
//!
//! The lock is a payload-free key written with set-if-absent plus an expiry;
//! the expiry frees keys whose holder crashed mid critical section.

use rand::Rng;
use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};
use trove_config::LockConfig;
use trove_config::constants::*;

use crate::{
    error::StoreResult,
    ports::{CoordinationStore, expiry_secs},
};

const LOCK_VALUE: &str = "1";

/// Bounded retry with exponential, jittered, capped backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LOCK_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_LOCK_BASE_DELAY_MS),
            backoff_factor: DEFAULT_LOCK_BACKOFF_FACTOR,
            max_delay: Duration::from_millis(DEFAULT_LOCK_MAX_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_LOCK_MAX_JITTER_MS),
        }
    }
}

impl From<&LockConfig> for RetryPolicy {
    fn from(config: &LockConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            backoff_factor: config.backoff_factor,
            max_delay: config.max_delay,
            max_jitter: config.max_jitter,
        }
    }
}

impl RetryPolicy {
    /// `base * factor^attempt`, capped, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_ms = (self.base_delay.as_millis() as f64
            * self.backoff_factor.powi(exponent))
        .round();
        let cap_ms = self.max_delay.as_millis() as f64;
        if !scaled_ms.is_finite() || scaled_ms >= cap_ms {
            return self.max_delay;
        }
        Duration::from_millis(scaled_ms as u64)
    }

    /// Sleep before retrying after failed attempt `attempt` (zero based):
    /// `min(base * factor^attempt + jitter, cap)` with jitter uniform in
    /// `0..=max_jitter`.
    pub fn delay_for(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis())
            .unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.random_range(0..=jitter_ms))
        };

        self.backoff(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }
}

/// Lock acquisition over a [`CoordinationStore`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    policy: RetryPolicy,
    ttl: Duration,
}

impl fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLock")
            .field("store", &type_name_of_val(self.store.as_ref()))
            .field("policy", &self.policy)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        policy: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self { store, policy, ttl }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Single set-if-absent attempt.
    pub async fn try_acquire(
        &self,
        lock_key: &str,
    ) -> StoreResult<Option<LockGuard>> {
        let acquired = self
            .store
            .set(lock_key, LOCK_VALUE, expiry_secs(self.ttl), true)
            .await?;

        Ok(acquired.then(|| LockGuard::new(Arc::clone(&self.store), lock_key)))
    }

    /// Retry [`try_acquire`](Self::try_acquire) under the policy. Store errors
    /// count as failed attempts. `None` once attempts are exhausted.
    pub async fn acquire(&self, lock_key: &str) -> Option<LockGuard> {
        for attempt in 0..self.policy.max_attempts {
            match self.try_acquire(lock_key).await {
                Ok(Some(guard)) => {
                    if attempt > 0 {
                        debug!(key = %lock_key, attempt, "lock acquired after retry");
                    }
                    return Some(guard);
                }
                Ok(None) => {
                    debug!(key = %lock_key, attempt, "lock busy");
                }
                Err(err) => {
                    debug!(key = %lock_key, attempt, error = %err, "lock attempt failed");
                }
            }

            if attempt + 1 < self.policy.max_attempts {
                let delay = {
                    let mut rng = rand::rng();
                    self.policy.delay_for(attempt, &mut rng)
                };
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            key = %lock_key,
            attempts = self.policy.max_attempts,
            "lock not acquired; giving up"
        );
        None
    }
}

/// Proof of holding a lock. Call [`release`](Self::release) at the end of the
/// critical section; a guard dropped without it releases in the background.
pub struct LockGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
    released: bool,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    fn new(store: Arc<dyn CoordinationStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unconditional delete of the lock key.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.store.del(&self.key).await {
            warn!(key = %self.key, error = %err, "failed to release lock; it will expire");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.del(&key).await {
                        warn!(key = %key, error = %err, "failed to release dropped lock; it will expire");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "lock dropped outside a runtime; it will expire");
            }
        }
    }
}
