//! C6 — OTP service.
//!
//! Send and verify one-time codes over the cache, with cooldown,
//! per-window attempt limits, and a fraud audit hook on every failure.
//! Never touches `users`/`sessions` directly — verification success
//! only hands the caller a phone number to upsert.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cache::CacheAdapter;
use crate::config::OtpConfig;
use crate::error::{AppError, AppResult};
use crate::fraud::FraudSignals;

fn last_request_key(phone: &str) -> String {
    format!("otp:last_request:{phone}")
}

fn send_limit_key(phone: &str) -> String {
    format!("otp:send:limit:{phone}")
}

fn code_key(phone: &str) -> String {
    format!("otp:phone:{phone}")
}

fn verify_attempts_key(phone: &str) -> String {
    format!("otp:verify:attempts:{phone}")
}

/// Matches the `otp:phone:{phone}` envelope named in spec.md §3:
/// `{code, expiresAt, ip, userAgent}`. The cache entry itself carries a
/// TTL too, but `expires_at` is checked explicitly so an expired-but-
/// not-yet-evicted code surfaces the distinct `OTP_EXPIRED` outcome
/// rather than being indistinguishable from "never existed".
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredOtp {
    code: String,
    #[serde(rename = "expiresAt")]
    expires_at: DateTime<Utc>,
    ip: Option<String>,
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
}

#[derive(Clone)]
pub struct OtpService {
    cache: CacheAdapter,
    fraud: FraudSignals,
    config: OtpConfig,
}

impl OtpService {
    pub fn new(cache: CacheAdapter, fraud: FraudSignals, config: OtpConfig) -> Self {
        Self {
            cache,
            fraud,
            config,
        }
    }

    /// Generate, store, and "send" an OTP for `phone`. Returns the code
    /// only in sandbox mode, for the caller to embed in the response;
    /// in production mode the caller discards the return value and
    /// relies on the SMS provider to deliver it out of band.
    ///
    /// Two independent cooldown markers are checked and set in
    /// lockstep (`otp:send:limit:{phone}`, `otp:last_request:{phone}`,
    /// both TTL'd to `SEND_COOLDOWN`) — a pre-existing two-key design,
    /// not collapsed into one here, so the distinct `EXCEEDED_SEND_LIMIT`
    /// / `PLEASE_WAIT_BEFORE_NEXT_REQUEST` error codes stay reachable
    /// independently if a future caller sets them on different TTLs.
    pub async fn send(
        &self,
        phone: &str,
        address: Option<&str>,
        user_agent: Option<&str>,
        sandbox: bool,
    ) -> AppResult<Option<String>> {
        let phone = normalize_phone(phone);

        if FraudSignals::has_unusual_pattern(&phone) {
            tracing::warn!(phone, "fraud signal: unusual phone pattern at otp send");
        }

        if self.cache.exists(&send_limit_key(&phone)).await? {
            return Err(AppError::ExceededSendLimit);
        }
        if self.cache.exists(&last_request_key(&phone)).await? {
            return Err(AppError::PleaseWaitBeforeNextRequest);
        }

        let code = generate_code(self.config.length);
        let stored = StoredOtp {
            code: code.clone(),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.config.ttl)
                    .map_err(|e| AppError::Internal(format!("bad otp ttl: {e}")))?,
            ip: address.map(|s| s.to_string()),
            user_agent: user_agent.map(|s| s.to_string()),
        };
        let payload = serde_json::to_string(&stored)
            .map_err(|e| AppError::Internal(format!("otp serialize: {e}")))?;
        self.cache
            .setex(&code_key(&phone), &payload, self.config.ttl)
            .await?;
        self.cache
            .setex(&send_limit_key(&phone), "1", self.config.send_cooldown)
            .await?;
        self.cache
            .setex(&last_request_key(&phone), "1", self.config.send_cooldown)
            .await?;
        // Fresh send resets any stale attempt counter from a prior code.
        self.cache.del(&verify_attempts_key(&phone)).await?;

        dispatch_sms(&phone, &code, sandbox);

        Ok(sandbox.then_some(code))
    }

    /// Verify `code` against the stored OTP for `phone`. On success the
    /// stored code and attempt counter are cleared; on failure the
    /// attempt counter is bumped and a fraud signal is recorded against
    /// the phone (attempt-cap exceeded) or the caller's address
    /// (wrong-code guesses), matching the two distinct failure-tracking
    /// keys named in the data model.
    pub async fn verify(&self, phone: &str, code: &str, address: Option<&str>) -> AppResult<String> {
        let phone = normalize_phone(phone);

        let attempts = self.cache.incr(&verify_attempts_key(&phone)).await?;
        if attempts == 1 {
            self.cache
                .expire(&verify_attempts_key(&phone), self.config.verify_window)
                .await?;
        }
        if attempts > self.config.max_verify_attempts as i64 {
            self.fraud.track_otp_failure_by_phone(&phone).await;
            return Err(AppError::ExceededVerificationAttempts);
        }

        let Some(raw) = self.cache.get(&code_key(&phone)).await? else {
            return Err(AppError::OtpNotFoundOrExpired);
        };
        let stored: StoredOtp = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("otp deserialize: {e}")))?;

        if Utc::now() > stored.expires_at {
            self.cache.del(&code_key(&phone)).await?;
            return Err(AppError::OtpExpired);
        }

        if stored.code != code {
            if let Some(addr) = address {
                self.fraud.track_otp_failure_by_address(addr).await;
            }
            return Err(AppError::InvalidOtpCode);
        }

        self.cache.del(&code_key(&phone)).await?;
        self.cache.del(&verify_attempts_key(&phone)).await?;
        self.cache.del(&last_request_key(&phone)).await?;
        self.cache.del(&send_limit_key(&phone)).await?;
        Ok(phone)
    }
}

fn generate_code(length: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..length).map(|_| rng.gen_range(0..10).to_string()).collect()
}

/// Sandbox mode skips the provider entirely; production mode would
/// call out to the SMS gateway here. The body of that call is out of
/// scope — only its observable effect (a code reaching the user) is.
fn dispatch_sms(phone: &str, code: &str, sandbox: bool) {
    if sandbox {
        tracing::debug!(phone, "otp send (sandbox, not dispatched): {code}");
    } else {
        tracing::info!(phone, "otp dispatched via sms provider");
    }
}

static PHONE_RE: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"^\+[1-9][0-9]{7,14}$").unwrap());

/// `true` iff `phone` matches a plausible E.164-ish shape: a leading
/// `+`, then 8-15 digits. Intentionally permissive — carrier validation
/// happens at the SMS provider, not here.
pub fn valid_phone_format(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

/// `true` iff `code` is exactly `length` ascii digits.
pub fn valid_otp_format(code: &str, length: u32) -> bool {
    code.len() == length as usize && code.chars().all(|c| c.is_ascii_digit())
}

/// Strip everything but digits and a leading `+`, then ensure a
/// leading `+` is present — so `"0912..."`, `"00989123456789"`, and
/// `"+989123456789"` all collapse to the same cache/DB key.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{digits}")
}
