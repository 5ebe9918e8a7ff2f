//! C4 — session cache.
//!
//! Maps a token prefix to a session id, for both the access and refresh
//! token namespaces. Cache entries are weak references: losing one
//! never invalidates a live session, it only costs a DB fallback scan
//! on the next validation (see `session::validate_session`).

use std::time::Duration;
use uuid::Uuid;

use crate::cache::CacheAdapter;
use crate::error::AppResult;
use crate::token;

fn access_key(token_prefix: &str) -> String {
    format!("session:token:{token_prefix}")
}

fn refresh_key(token_prefix: &str) -> String {
    format!("session:refresh:{token_prefix}")
}

fn refresh_frequency_key(user_id: Uuid) -> String {
    format!("refresh:frequency:{user_id}")
}

#[derive(Clone)]
pub struct SessionCache {
    cache: CacheAdapter,
}

impl SessionCache {
    pub fn new(cache: CacheAdapter) -> Self {
        Self { cache }
    }

    pub async fn put_access(&self, access_token: &str, session_id: Uuid, ttl: Duration) -> AppResult<()> {
        let key = access_key(&token::prefix(access_token));
        self.cache.setex(&key, &session_id.to_string(), ttl).await
    }

    pub async fn put_refresh(&self, refresh_token: &str, session_id: Uuid, ttl: Duration) -> AppResult<()> {
        let key = refresh_key(&token::prefix(refresh_token));
        self.cache.setex(&key, &session_id.to_string(), ttl).await
    }

    pub async fn lookup_access(&self, access_token: &str) -> AppResult<Option<Uuid>> {
        let key = access_key(&token::prefix(access_token));
        Ok(self
            .cache
            .get(&key)
            .await?
            .and_then(|v| Uuid::parse_str(&v).ok()))
    }

    pub async fn lookup_refresh(&self, refresh_token: &str) -> AppResult<Option<Uuid>> {
        let key = refresh_key(&token::prefix(refresh_token));
        Ok(self
            .cache
            .get(&key)
            .await?
            .and_then(|v| Uuid::parse_str(&v).ok()))
    }

    pub async fn purge_access(&self, access_token: &str) -> AppResult<()> {
        let key = access_key(&token::prefix(access_token));
        self.cache.del(&key).await
    }

    /// Increment the hourly per-user refresh counter, returning the new
    /// count. Used to drive the (non-blocking) refresh-frequency fraud
    /// signal.
    pub async fn bump_refresh_frequency(&self, user_id: Uuid) -> AppResult<i64> {
        let key = refresh_frequency_key(user_id);
        let count = self.cache.incr(&key).await?;
        if count == 1 {
            self.cache.expire(&key, Duration::from_secs(3600)).await?;
        }
        Ok(count)
    }
}
