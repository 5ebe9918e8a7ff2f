//! C1 — key-value cache adapter.
//!
//! Thin wrapper over a pooled Redis connection: `get/set/setex/incr/
//! expire/del/ping`. Connections are managed by `deadpool-redis`, which
//! reconnects lazily on the next checkout after a transient failure;
//! callers are expected to wrap individual calls with a deadline the
//! way the rest of this crate wraps DB and broker I/O.

use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;

use crate::config::CacheConfig;
use crate::error::AppResult;

#[derive(Clone)]
pub struct CacheAdapter {
    pool: Pool,
}

impl CacheAdapter {
    pub fn connect(config: &CacheConfig) -> AppResult<Self> {
        let pool_config = PoolConfig::from_url(config.connection_url());
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| crate::error::AppError::Internal(format!("redis pool init: {e}")))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> AppResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(crate::error::AppError::from)
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    /// SET with an expiry, the workhorse for every TTL-bounded ephemeral key.
    pub async fn setex(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    /// Atomically increment a counter, returning the post-increment value.
    pub async fn incr(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, 1).await?)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    /// Remaining TTL in seconds, or `None` if the key has no expiry or
    /// does not exist.
    pub async fn ttl(&self, key: &str) -> AppResult<Option<i64>> {
        let mut conn = self.conn().await?;
        let secs: i64 = conn.ttl(key).await?;
        Ok(if secs >= 0 { Some(secs) } else { None })
    }

    pub async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    pub async fn ping(&self) -> bool {
        match self.conn().await {
            Ok(mut conn) => redis::cmd("PING").query_async::<_, String>(&mut conn).await.is_ok(),
            Err(_) => false,
        }
    }
}
