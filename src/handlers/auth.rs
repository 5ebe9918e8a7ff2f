//! HTTP surface for OTP issuance/verification and session lifecycle.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::Principal;
use crate::otp;
use crate::session::RequestContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub phone: String,
}

pub async fn send_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendOtpRequest>,
) -> AppResult<Json<Value>> {
    if !otp::valid_phone_format(&otp::normalize_phone(&req.phone)) {
        return Err(AppError::InvalidPhoneFormat);
    }

    let address = client_ip(&headers);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    let result = state
        .otp
        .send(&req.phone, address.as_deref(), user_agent, state.config.sms.sandbox)
        .await;
    crate::metrics::record_otp_send(if result.is_ok() { "ok" } else { "error" });
    let code = result?;

    let mut body = json!({ "message": "OTP_SENT_SUCCESSFULLY" });
    if let Some(code) = code {
        body["otp"] = json!(code);
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    pub session: SessionSummary,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: uuid::Uuid,
    #[serde(rename = "userId")]
    pub user_id: uuid::Uuid,
    #[serde(rename = "expiresAt")]
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VerifyOtpRequest>,
) -> AppResult<Json<SessionResponse>> {
    if !otp::valid_phone_format(&otp::normalize_phone(&req.phone)) {
        return Err(AppError::InvalidPhoneFormat);
    }
    if !otp::valid_otp_format(&req.code, state.config.otp.length) {
        return Err(AppError::InvalidOtpFormat);
    }

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let address = client_ip(&headers);

    let result = state.otp.verify(&req.phone, &req.code, address.as_deref()).await;
    crate::metrics::record_otp_verify(if result.is_ok() { "ok" } else { "error" });
    let normalized_phone = result?;

    let user = crate::db::upsert_user_by_phone(&state.pool, &normalized_phone).await?;

    let issued = state
        .session
        .create_session(
            user.id,
            RequestContext {
                user_agent,
                address: address.as_deref(),
            },
        )
        .await?;

    Ok(Json(SessionResponse {
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
        session: SessionSummary {
            id: issued.session.id,
            user_id: issued.session.user_id,
            expires_at: issued.session.expires_at,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<RefreshResponse>> {
    let (_session, access_token) = state.session.refresh_session(&req.refresh_token).await?;
    Ok(Json(RefreshResponse { access_token }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Value>> {
    let sessions = state.session.list_sessions(principal.user_id).await?;
    let views: Vec<crate::models::SessionView> = sessions.iter().map(crate::models::SessionView::from).collect();
    Ok(Json(json!({ "sessions": views })))
}

pub async fn delete_session(
    State(state): State<AppState>,
    principal: Principal,
    axum::extract::Path(session_id): axum::extract::Path<uuid::Uuid>,
) -> AppResult<Json<Value>> {
    let deleted = state.session.delete_session(session_id, principal.user_id).await?;
    if !deleted {
        return Err(AppError::Forbidden);
    }
    Ok(Json(json!({ "deleted": true })))
}

pub async fn delete_all_sessions(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Value>> {
    let count = state.session.delete_all_sessions(principal.user_id).await?;
    Ok(Json(json!({ "deletedCount": count })))
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
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
