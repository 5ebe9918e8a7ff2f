//! C7 — session service.
//!
//! Creates, validates, refreshes, and tears down sessions. Validation
//! is a two-tier lookup: the cache maps a token prefix straight to a
//! session id; on a cache miss it falls back to a bounded recent-session
//! DB scan and repopulates the cache, so a single evicted cache entry
//! never strands an otherwise-valid session.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::fraud::FraudSignals;
use crate::models::Session;
use crate::session_cache::SessionCache;
use crate::token::{self, TokenParams};

#[derive(Clone)]
pub struct SessionService {
    pool: sqlx::PgPool,
    cache: SessionCache,
    fraud: FraudSignals,
    config: SessionConfig,
}

pub struct IssuedSession {
    pub session: Session,
    pub access_token: String,
    pub refresh_token: String,
}

/// Caller-supplied request context, used only for the optional
/// fraud-signal cross-check and session bookkeeping — never for
/// access control unless `enable_ip_validation` is set.
pub struct RequestContext<'a> {
    pub user_agent: Option<&'a str>,
    pub address: Option<&'a str>,
}

impl SessionService {
    pub fn new(
        pool: sqlx::PgPool,
        cache: SessionCache,
        fraud: FraudSignals,
        config: SessionConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            fraud,
            config,
        }
    }

    /// Issue a fresh session for `user_id`: generate an access/refresh
    /// token pair, persist their bcrypt hashes, and warm the cache.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        ctx: RequestContext<'_>,
    ) -> AppResult<IssuedSession> {
        self.fraud
            .check_concurrent_sessions(&self.pool, user_id, ctx.address)
            .await;

        let params = TokenParams::new(self.config.token_length, self.config.bcrypt_rounds);
        let (access_token, access_hash) = token::generate_token(params)?;
        let (refresh_token, refresh_hash) = token::generate_token(params)?;

        let expires_at = expiry_from_now(self.config.refresh_ttl)?;

        let session = db::insert_session(
            &self.pool,
            user_id,
            &access_hash,
            &refresh_hash,
            ctx.user_agent,
            ctx.address,
            expires_at,
        )
        .await?;

        self.cache
            .put_access(&access_token, session.id, self.config.access_ttl)
            .await?;
        self.cache
            .put_refresh(&refresh_token, session.id, self.config.refresh_ttl)
            .await?;

        Ok(IssuedSession {
            session,
            access_token,
            refresh_token,
        })
    }

    /// Resolve a bearer access token to its session, verifying the
    /// bcrypt hash and expiry. Cache hit skips straight to the targeted
    /// row; cache miss falls back to a bounded DB scan over recently
    /// created non-expired sessions, repopulating the cache on success.
    pub async fn validate_session(
        &self,
        access_token: &str,
        ctx: RequestContext<'_>,
    ) -> AppResult<Session> {
        let session = match self.cache.lookup_access(access_token).await? {
            Some(session_id) => match db::get_session(&self.pool, session_id).await? {
                Some(session) if self.verify_and_check(&session, access_token).is_ok() => session,
                _ => {
                    // Stale pointer or hash mismatch: purge it and fall
                    // back to the bounded DB scan rather than rejecting
                    // outright.
                    self.cache.purge_access(access_token).await.ok();
                    self.scan_for_session(access_token).await?
                }
            },
            None => self.scan_for_session(access_token).await?,
        };

        if self.config.enable_ip_validation {
            if let (Some(expected), Some(actual)) = (session.address.as_deref(), ctx.address) {
                if expected != actual {
                    return Err(AppError::SessionIpMismatch);
                }
            }
        }

        // Re-cache with whichever is smaller: the configured access TTL,
        // or the time actually left before the session row expires.
        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let cache_ttl = remaining.min(self.config.access_ttl);
        self.cache
            .put_access(access_token, session.id, cache_ttl)
            .await?;

        Ok(session)
    }

    async fn scan_for_session(&self, access_token: &str) -> AppResult<Session> {
        let candidates =
            db::recent_non_expired_sessions(&self.pool, self.config.recent_lookup_limit).await?;
        for session in candidates {
            if token::verify_token(access_token, &session.access_hash) {
                return Ok(session);
            }
        }
        Err(AppError::InvalidOrExpiredToken)
    }

    fn verify_and_check(&self, session: &Session, access_token: &str) -> AppResult<()> {
        if session.is_expired(Utc::now()) {
            return Err(AppError::InvalidOrExpiredToken);
        }
        if !token::verify_token(access_token, &session.access_hash) {
            return Err(AppError::InvalidOrExpiredToken);
        }
        Ok(())
    }

    /// Rotate only the access token; the refresh token itself is never
    /// rotated in this design (see DESIGN.md open-question decisions).
    pub async fn refresh_session(&self, refresh_token: &str) -> AppResult<(Session, String)> {
        let session_id = self
            .cache
            .lookup_refresh(refresh_token)
            .await?
            .ok_or(AppError::InvalidRefreshToken);
        let session = match session_id {
            Ok(id) => db::get_session(&self.pool, id)
                .await?
                .ok_or(AppError::InvalidRefreshToken)?,
            Err(_) => self.scan_for_refresh(refresh_token).await?,
        };

        if session.is_expired(Utc::now()) {
            return Err(AppError::InvalidRefreshToken);
        }
        match &session.refresh_hash {
            Some(hash) if token::verify_token(refresh_token, hash) => {}
            _ => return Err(AppError::InvalidRefreshToken),
        }

        let count = self.cache.bump_refresh_frequency(session.user_id).await?;
        if count > self.config.bulk_refresh_limit {
            tracing::warn!(
                user_id = %session.user_id,
                count,
                "fraud signal: unusually high refresh frequency"
            );
        }

        let params = TokenParams::new(self.config.token_length, self.config.bcrypt_rounds);
        let (new_access_token, new_access_hash) = token::generate_token(params)?;
        // DB write happens before the new cache entry so a concurrent
        // validateSession on the same session id can never observe the
        // cached prefix before the hash it must verify against.
        db::update_access_hash(&self.pool, session.id, &new_access_hash).await?;
        self.cache
            .put_access(&new_access_token, session.id, self.config.access_ttl)
            .await?;

        Ok((session, new_access_token))
    }

    async fn scan_for_refresh(&self, refresh_token: &str) -> AppResult<Session> {
        let candidates =
            db::recent_non_expired_sessions(&self.pool, self.config.bulk_refresh_limit).await?;
        for session in candidates {
            if let Some(hash) = &session.refresh_hash {
                if token::verify_token(refresh_token, hash) {
                    return Ok(session);
                }
            }
        }
        Err(AppError::InvalidRefreshToken)
    }

    pub async fn delete_session(&self, session_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let rows = db::delete_session(&self.pool, session_id, user_id).await?;
        Ok(rows > 0)
    }

    pub async fn delete_all_sessions(&self, user_id: Uuid) -> AppResult<u64> {
        Ok(db::delete_all_sessions_for_user(&self.pool, user_id).await?)
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> AppResult<Vec<Session>> {
        Ok(db::list_sessions_for_user(&self.pool, user_id).await?)
    }

    /// Scheduled cleanup entry point; returns the number of rows purged.
    pub async fn cleanup_expired(&self) -> AppResult<u64> {
        Ok(db::cleanup_expired_sessions(&self.pool).await?)
    }
}

pub fn expiry_from_now(ttl: std::time::Duration) -> AppResult<DateTime<Utc>> {
    Ok(Utc::now()
        + chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Internal(format!("bad ttl: {e}")))?)
}
