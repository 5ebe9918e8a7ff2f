//! Shared application error type.
//!
//! One enum carries every stable, machine-readable message constant
//! named in the error handling design; `IntoResponse` maps each
//! variant to its HTTP status without leaking internal detail.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // -- validation (400) --
    #[error("INVALID_PREDICTION_FORMAT")]
    InvalidPredictionFormat,
    #[error("INVALID_PHONE_FORMAT")]
    InvalidPhoneFormat,
    #[error("INVALID_OTP_FORMAT")]
    InvalidOtpFormat,

    // -- authentication (401) --
    #[error("MISSING_ACCESS_TOKEN")]
    MissingAccessToken,
    #[error("INVALID_OR_EXPIRED_TOKEN")]
    InvalidOrExpiredToken,
    #[error("SESSION_IP_MISMATCH")]
    SessionIpMismatch,
    #[error("INVALID_REFRESH_TOKEN")]
    InvalidRefreshToken,

    // -- authorization (403) --
    #[error("FORBIDDEN")]
    Forbidden,

    // -- rate/throttle (429) --
    #[error("EXCEEDED_SEND_LIMIT")]
    ExceededSendLimit,
    #[error("PLEASE_WAIT_BEFORE_NEXT_REQUEST")]
    PleaseWaitBeforeNextRequest,
    #[error("EXCEEDED_VERIFICATION_ATTEMPTS")]
    ExceededVerificationAttempts,

    // -- OTP state (400 domain) --
    #[error("OTP_EXPIRED")]
    OtpExpired,
    #[error("OTP_NOT_FOUND_OR_EXPIRED")]
    OtpNotFoundOrExpired,
    #[error("INVALID_OTP_CODE")]
    InvalidOtpCode,

    // -- infrastructure (500) --
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidPredictionFormat
            | AppError::InvalidPhoneFormat
            | AppError::InvalidOtpFormat
            | AppError::OtpExpired
            | AppError::OtpNotFoundOrExpired
            | AppError::InvalidOtpCode => StatusCode::BAD_REQUEST,

            AppError::MissingAccessToken
            | AppError::InvalidOrExpiredToken
            | AppError::SessionIpMismatch
            | AppError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,

            AppError::Forbidden => StatusCode::FORBIDDEN,

            AppError::ExceededSendLimit
            | AppError::PleaseWaitBeforeNextRequest
            | AppError::ExceededVerificationAttempts => StatusCode::TOO_MANY_REQUESTS,

            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The stable machine-readable constant surfaced in the response body.
    fn code(&self) -> String {
        self.to_string()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if matches!(self, AppError::Internal(_)) {
            // Never leak internal detail; log it and surface a generic code.
            tracing::error!(error = %self, "internal error");
            "INTERNAL_ERROR".to_string()
        } else {
            self.code()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(format!("database error: {e}"))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Internal(format!("cache error: {e}"))
    }
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        AppError::Internal(format!("cache pool error: {e}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;
