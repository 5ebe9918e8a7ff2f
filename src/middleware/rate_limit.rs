//! Ancillary per-IP rate limiting.
//!
//! This is a coarse, in-memory backstop against request floods; it is
//! distinct from (and does not replace) the cache-backed OTP send/verify
//! limits in `otp.rs`, which are the source of truth for those flows.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    pub fn retry_after_secs(&self) -> u64 {
        if self.tokens >= 1.0 {
            0
        } else {
            ((1.0 - self.tokens) / self.refill_rate).ceil() as u64
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<String, TokenBucket>>,
    capacity: u32,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            capacity,
            refill_rate,
        }
    }

    pub fn check(&self, key: &str) -> Result<(), u64> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_rate));
        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.retry_after_secs())
        }
    }

    pub async fn cleanup_old_buckets(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        let per_minute = std::env::var("RATE_LIMIT_IP_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(60);
        let burst = std::env::var("RATE_LIMIT_IP_BURST")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(per_minute.max(10) / 10);
        let refill = per_minute as f64 / 60.0;
        Self::new(burst, refill)
    }
}

/// Tighter bucket for the auth-otp endpoints: these are cheap requests
/// that trigger expensive downstream side effects (an SMS send).
fn otp_endpoint_quota() -> (u32, f64) {
    let per_minute = std::env::var("RATE_LIMIT_OTP_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);
    (per_minute.max(1), per_minute as f64 / 60.0)
}

pub static IP_LIMITER: Lazy<RateLimiter> = Lazy::new(RateLimiter::default);
pub static OTP_IP_LIMITER: Lazy<RateLimiter> = Lazy::new(|| {
    let (capacity, refill_rate) = otp_endpoint_quota();
    RateLimiter::new(capacity, refill_rate)
});

fn is_otp_endpoint(uri: &str) -> bool {
    uri.contains("/auth/send-otp") || uri.contains("/auth/verify-otp")
}

fn extract_client_ip(headers: &HeaderMap) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(|s| s.trim().to_string()) {
            if !ip.is_empty() {
                return ip;
            }
        }
    }
    if let Some(ip) = headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|h| h.to_str().ok())
    {
        return ip.to_string();
    }
    "unknown".to_string()
}

pub async fn rate_limit_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let uri = request.uri().to_string();
    let client_ip = extract_client_ip(request.headers());

    let limiter = if is_otp_endpoint(&uri) {
        &*OTP_IP_LIMITER
    } else {
        &*IP_LIMITER
    };

    match limiter.check(&client_ip) {
        Ok(()) => Ok(next.run(request).await),
        Err(retry_after) => {
            tracing::warn!(
                client_ip,
                uri,
                retry_after,
                "ip rate limit exceeded"
            );
            let mut resp = Response::new(axum::body::Body::empty());
            resp.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from_str(&retry_after.to_string())
                    .unwrap_or(axum::http::HeaderValue::from_static("1")),
            );
            *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket() {
        let mut bucket = TokenBucket::new(10, 5.0);
        for _ in 0..10 {
            assert!(bucket.try_consume());
        }
        assert!(!bucket.try_consume());
    }

    #[tokio::test]
    async fn test_rate_limiter() {
        let limiter = RateLimiter::new(5, 1.0);
        for _ in 0..5 {
            assert!(limiter.check("user1").is_ok());
        }
        assert!(limiter.check("user1").is_err());
        assert!(limiter.check("user2").is_ok());
    }
}
