//! Redis implementation of [`KvBackend`].
//!
//! Uses a single multiplexed connection; each command clones the handle,
//! which is cheap and safe across concurrent send tasks.

use crate::kv::{BackendError, BackendResult, KvBackend};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisKv {
    conn: MultiplexedConnection,
}

impl RedisKv {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(redis_url: &str) -> BackendResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(BackendError::Unavailable(format!(
                "unexpected PING reply: {}",
                pong
            )));
        }

        info!(redis_url = %redis_url, "Connected to Redis");
        Ok(Self { conn })
    }
}

/// Redis expiries are whole seconds and must be positive.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvBackend for RedisKv {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        debug!(key = %key, ttl_secs = ttl_secs(ttl), "SETEX");
        Ok(())
    }

    async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn incr(&self, key: &str) -> BackendResult<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let _: () = conn.expire(key, secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
