use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{error::StoreResult, ports::CoordinationStore};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    sorted: HashMap<String, HashMap<String, i64>>,
}

impl State {
    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        let expired = self
            .values
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now);
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }

    fn prune(&mut self, now: Instant) {
        self.values.retain(|_, entry| entry.expires_at > now);
    }
}

/// Process-local coordination store for dev mode and tests.
///
/// Expiry is measured on the tokio clock, so paused-time tests can step
/// through TTLs. Only correct within a single process.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    state: Mutex<State>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state
            .live(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry_secs: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now);
        if only_if_absent && state.values.contains_key(key) {
            return Ok(false);
        }

        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + Duration::from_secs(expiry_secs),
            },
        );
        Ok(true)
    }

    async fn setex(
        &self,
        key: &str,
        expiry_secs: u64,
        value: &str,
    ) -> StoreResult<()> {
        self.set(key, value, expiry_secs, false).await.map(|_| ())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.state.lock().await.values.remove(key);
        Ok(())
    }

    async fn zadd(
        &self,
        index: &str,
        member: &str,
        score: i64,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .sorted
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        let Some(members) = state.sorted.get(index) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(&String, i64)> = members
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member, *score))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|(member, _)| member.clone())
            .collect())
    }

    async fn zrem(&self, index: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state
            .sorted
            .get_mut(index)
            .is_some_and(|members| members.remove(member).is_some());
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        debug!("in-memory coordination store ping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn conditional_set_respects_existing_keys_until_expiry() {
        let store = InMemoryCoordinationStore::new();

        assert!(store.set("lock", "1", 2, true).await.unwrap());
        assert!(!store.set("lock", "1", 2, true).await.unwrap());

        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("lock").await.unwrap().is_none());
        assert!(store.set("lock", "1", 2, true).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn setex_overwrites_and_refreshes_ttl() {
        let store = InMemoryCoordinationStore::new();

        store.setex("pending", 2, "a").await.unwrap();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        store.setex("pending", 2, "b").await.unwrap();
        tokio::time::advance(Duration::from_millis(1_500)).await;

        assert_eq!(store.get("pending").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn writes_prune_entries_nobody_reads_again() {
        let store = InMemoryCoordinationStore::new();

        store.set("abandoned-lock", "1", 1, true).await.unwrap();
        store.setex("abandoned-buffer", 1, "{}").await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store.setex("fresh", 8, "{}").await.unwrap();

        let state = store.state.lock().await;
        assert_eq!(state.values.len(), 1);
        assert!(state.values.contains_key("fresh"));
    }

    #[tokio::test]
    async fn zset_operations() {
        let store = InMemoryCoordinationStore::new();

        store.zadd("due", "b", 20).await.unwrap();
        store.zadd("due", "a", 10).await.unwrap();
        store.zadd("due", "c", 30).await.unwrap();

        assert_eq!(
            store.zrange_by_score("due", 20, 10).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            store.zrange_by_score("due", i64::MAX, 1).await.unwrap(),
            vec!["a".to_string()]
        );

        assert!(store.zrem("due", "a").await.unwrap());
        assert!(!store.zrem("due", "a").await.unwrap());
        assert!(!store.zrem("missing", "a").await.unwrap());
    }
}
