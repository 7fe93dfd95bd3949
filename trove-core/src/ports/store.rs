use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreResult;

/// Shared key-value store every worker coordinates through.
///
/// Conditional create (`set` with `only_if_absent`) is the only primitive the
/// saga relies on for mutual exclusion; everything else is plain reads and
/// writes performed while holding a lock built on it. The sorted-set
/// operations back the durable flush due index.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write `value` with an expiry. With `only_if_absent` the write happens
    /// only when the key does not exist; returns whether it was written.
    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry_secs: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool>;

    async fn setex(
        &self,
        key: &str,
        expiry_secs: u64,
        value: &str,
    ) -> StoreResult<()>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    async fn zadd(
        &self,
        index: &str,
        member: &str,
        score: i64,
    ) -> StoreResult<()>;

    /// Members with a score `<= max_score`, lowest score first.
    async fn zrange_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    /// Remove `member`; `true` only for the caller that actually removed it.
    async fn zrem(&self, index: &str, member: &str) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Whole seconds for a store expiry, rounded up so a sub-second remainder
/// never shortens the TTL. Never returns zero.
pub fn expiry_secs(ttl: Duration) -> u64 {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000).max(1)
}
