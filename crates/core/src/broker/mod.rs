//! The Broker abstraction: the single Redis-backed surface through which
//! the Coordinator and every SatelliteCrawler coordinate. Lists back FIFO
//! queues, sorted sets back the scheduled-job and heartbeat namespaces,
//! pub/sub backs the control channel, and atomic pipelines back the
//! scheduler promotion sweep.

pub mod keys;

use crate::config::QueueConfig;
use crate::error::{CoreError, Result};
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

pub use keys::BrokerKeys;

#[derive(Clone)]
pub struct Broker {
    pool: Pool<RedisConnectionManager>,
    client: redis::Client,
    pub keys: BrokerKeys,
}

impl Broker {
    pub async fn connect(redis_url: &str, queue: &QueueConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(redis_url)
            .map_err(|e| CoreError::Pool(e.to_string()))?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| CoreError::Pool(e.to_string()))?;
        let client =
            redis::Client::open(redis_url).map_err(|e| CoreError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            client,
            keys: BrokerKeys::from_config(queue),
        })
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.map_err(|e| CoreError::Pool(e.to_string()))
    }

    // ---- FIFO queues (lists) ----------------------------------------

    /// Push a serialized payload onto the head of a list (`lpush`).
    pub async fn push(&self, queue: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(queue, payload).await?;
        Ok(())
    }

    /// Blocking pop from the tail of a list, with a bounded timeout.
    /// Returns `None` on timeout (no poisoning, the caller simply loops).
    pub async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let result: Option<(String, String)> = conn.brpop(queue, timeout.as_secs_f64()).await?;
        Ok(result.map(|(_, payload)| payload))
    }

    /// Remove all occurrences of a payload from a list (`lrem count=0`).
    pub async fn remove_all(&self, queue: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.lrem(queue, 0, payload).await?;
        Ok(removed)
    }

    pub async fn queue_len(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.llen(queue).await?;
        Ok(len)
    }

    /// Whether `payload` currently sits anywhere in `queue` (`LPOS`), used
    /// to tell a job that's still queued-but-unclaimed apart from one a
    /// satellite has already popped.
    pub async fn queue_contains(&self, queue: &str, payload: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let pos: Option<i64> = conn.lpos(queue, payload, redis::LposOptions::default()).await?;
        Ok(pos.is_some())
    }

    // ---- Sorted sets (scheduled jobs, heartbeats) -------------------

    pub async fn zadd(&self, set: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(set, member, score).await?;
        Ok(())
    }

    pub async fn zrem(&self, set: &str, member: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.zrem(set, member).await?;
        Ok(removed)
    }

    pub async fn zcard(&self, set: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn.zcard(set).await?;
        Ok(count)
    }

    /// Members with score in `[min, max]`, ascending by score.
    pub async fn zrangebyscore(&self, set: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrangebyscore(set, min, max).await?;
        Ok(members)
    }

    /// Atomically remove `member` from `from_set` and push it onto
    /// `to_queue`. Used by the scheduler promotion sweep so a crash
    /// between the two steps cannot duplicate or drop a job.
    pub async fn move_scheduled_to_queue(
        &self,
        from_set: &str,
        to_queue: &str,
        member: &str,
    ) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .zrem(from_set, member)
            .lpush(to_queue, member)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    // ---- Flags -------------------------------------------------------

    pub async fn set_flag(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, "true").await?;
        Ok(())
    }

    pub async fn clear_flag(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    pub async fn is_flag_set(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    // ---- Pub/sub -------------------------------------------------------

    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    /// Dedicated pub/sub connection. Pub/sub connections cannot issue
    /// regular commands once subscribed, so this intentionally bypasses
    /// the pool rather than borrowing from it.
    pub async fn subscribe(&self, channels: &[&str]) -> Result<redis::aio::PubSub> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(CoreError::Broker)?;
        for channel in channels {
            pubsub.subscribe(*channel).await?;
        }
        Ok(pubsub)
    }
}
