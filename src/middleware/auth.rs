//! C8 — auth extractor.
//!
//! `Principal` is an axum extractor (`FromRequestParts`) analogous to
//! the teacher's `AuthUser`: it pulls the bearer token off the request,
//! validates it through the session service, and hands the handler a
//! typed `{ user_id, session_id }` pair instead of a raw token.

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};

use crate::error::AppError;
use crate::session::{RequestContext, SessionService};

#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
}

impl<S> FromRequestParts<S> for Principal
where
    SessionService: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::MissingAccessToken)?;

        let address = client_ip(&parts.headers);
        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let session_service = SessionService::from_ref(state);
        let session = session_service
            .validate_session(
                &token,
                RequestContext {
                    user_agent: user_agent.as_deref(),
                    address: address.as_deref(),
                },
            )
            .await?;

        crate::metrics::record_session_validation("ok");

        Ok(Principal {
            user_id: session.user_id,
            session_id: session.id,
        })
    }
}

/// Same as `Principal`, but additionally requires the caller's phone to
/// be in the configured admin allowlist. Used for the dispatch/status
/// admin routes (spec: "yes (+admin)" — 403 otherwise).
#[derive(Debug, Clone, Copy)]
pub struct AdminPrincipal {
    pub user_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
}

impl<S> FromRequestParts<S> for AdminPrincipal
where
    SessionService: axum::extract::FromRef<S>,
    sqlx::PgPool: axum::extract::FromRef<S>,
    std::sync::Arc<crate::config::AppConfig>: axum::extract::FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;

        let config = std::sync::Arc::<crate::config::AppConfig>::from_ref(state);
        if config.admin_phones.is_empty() {
            return Err(AppError::Forbidden);
        }

        let pool = sqlx::PgPool::from_ref(state);
        let user = crate::db::get_user(&pool, principal.user_id)
            .await?
            .ok_or(AppError::Forbidden)?;

        if !config.admin_phones.iter().any(|p| p == &user.phone) {
            return Err(AppError::Forbidden);
        }

        Ok(AdminPrincipal {
            user_id: principal.user_id,
            session_id: principal.session_id,
        })
    }
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

fn client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = xff.split(',').next() {
            let ip = ip.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}
