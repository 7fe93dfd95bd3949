use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use tracing::{debug, info};

use crate::{
    error::{StoreError, StoreResult},
    ports::CoordinationStore,
};

/// Coordination store shared by every worker, backed by Redis.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCoordinationStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        info!("Connecting to Redis coordination store at {}", redis_url);

        let client = redis::Client::open(redis_url).map_err(|e| {
            StoreError::Unavailable(format!(
                "Failed to create Redis client: {e}"
            ))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to connect to Redis: {e}"))
        })?;

        info!("Successfully connected to Redis coordination store");

        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        debug!("Store GET: {}", key);
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry_secs: u64,
        only_if_absent: bool,
    ) -> StoreResult<bool> {
        debug!(
            "Store SET: {} (EX {}s, NX: {})",
            key, expiry_secs, only_if_absent
        );
        let mut conn = self.conn.clone();

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(expiry_secs);
        if only_if_absent {
            cmd.arg("NX");
        }

        // Nil reply when NX refused the write.
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.as_deref() == Some("OK"))
    }

    async fn setex(
        &self,
        key: &str,
        expiry_secs: u64,
        value: &str,
    ) -> StoreResult<()> {
        debug!("Store SETEX: {} ({}s)", key, expiry_secs);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, expiry_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        debug!("Store DEL: {}", key);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn zadd(
        &self,
        index: &str,
        member: &str,
        score: i64,
    ) -> StoreResult<()> {
        debug!("Store ZADD: {} {} {}", index, score, member);
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(index)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        index: &str,
        max_score: i64,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        debug!("Store ZRANGEBYSCORE: {} -inf..{} LIMIT {}", index, max_score, limit);
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(index)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn zrem(&self, index: &str, member: &str) -> StoreResult<bool> {
        debug!("Store ZREM: {} {}", index, member);
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(index)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Store PING: {}", pong);
        Ok(())
    }
}
