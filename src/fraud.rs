//! C5 — fraud signals.
//!
//! Every check here is audit-only: none of these functions ever block
//! a request or return an error to the caller. They exist to leave a
//! trail for later review, mirroring the teacher's non-blocking
//! rate-limiter bookkeeping.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::cache::CacheAdapter;
use crate::db;

const CONCURRENT_CHECK_LIMIT: i64 = 10;
const CONCURRENT_CHECK_WINDOW_SECS: i64 = 300;
const FAILURE_THRESHOLD: i64 = 5;

#[derive(Clone)]
pub struct FraudSignals {
    cache: CacheAdapter,
}

impl FraudSignals {
    pub fn new(cache: CacheAdapter) -> Self {
        Self { cache }
    }

    /// Detect a repeated-digit run of 6+, a monotone run of 6+, or a
    /// well-known test pattern. Pure string predicate, audit-only.
    pub fn has_unusual_pattern(phone: &str) -> bool {
        let digits: Vec<u32> = phone.chars().filter_map(|c| c.to_digit(10)).collect();
        if digits.len() < 6 {
            return false;
        }
        has_repeated_run(&digits, 6) || has_monotone_run(&digits, 6) || is_well_known_test_pattern(&digits)
    }

    /// Fetch the user's recent sessions; if any was created within the
    /// window from a different address, log an audit signal. Never
    /// returns an error to the caller.
    pub async fn check_concurrent_sessions(
        &self,
        pool: &sqlx::PgPool,
        user_id: Uuid,
        current_addr: Option<&str>,
    ) {
        let since = Utc::now() - chrono::Duration::seconds(CONCURRENT_CHECK_WINDOW_SECS);
        let recent = match db::recent_sessions_for_user(pool, user_id, since, CONCURRENT_CHECK_LIMIT).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!("fraud check_concurrent_sessions query failed (non-fatal): {e}");
                return;
            }
        };

        for session in recent {
            if let (Some(addr), Some(current)) = (session.address.as_deref(), current_addr) {
                if addr != current {
                    tracing::warn!(
                        user_id = %user_id,
                        prior_address = addr,
                        current_address = current,
                        "fraud signal: concurrent session from a different address"
                    );
                }
            }
        }
    }

    pub async fn track_otp_failure_by_phone(&self, phone: &str) {
        self.bump_and_warn(&format!("otp:failures:{phone}"), "phone", phone)
            .await;
    }

    pub async fn track_otp_failure_by_address(&self, addr: &str) {
        self.bump_and_warn(&format!("otp:ip:failures:{addr}"), "address", addr)
            .await;
    }

    async fn bump_and_warn(&self, key: &str, kind: &str, subject: &str) {
        let count = match self.cache.incr(key).await {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("fraud counter increment failed (non-fatal): {e}");
                return;
            }
        };
        if count == 1 {
            let _ = self.cache.expire(key, Duration::from_secs(3600)).await;
        }
        if count >= FAILURE_THRESHOLD {
            tracing::warn!(kind, subject, count, "fraud signal: otp failure threshold crossed");
        }
    }

}

fn has_repeated_run(digits: &[u32], run_len: usize) -> bool {
    digits
        .windows(run_len)
        .any(|w| w.iter().all(|&d| d == w[0]))
}

fn has_monotone_run(digits: &[u32], run_len: usize) -> bool {
    digits.windows(run_len).any(|w| {
        let ascending = w.windows(2).all(|p| p[1] as i64 - p[0] as i64 == 1);
        let descending = w.windows(2).all(|p| p[0] as i64 - p[1] as i64 == 1);
        ascending || descending
    })
}

fn is_well_known_test_pattern(digits: &[u32]) -> bool {
    const PATTERNS: &[&[u32]] = &[&[1, 2, 3, 4, 5, 6], &[0, 0, 0, 0, 0, 0], &[1, 1, 1, 1, 1, 1]];
    PATTERNS.iter().any(|p| digits.windows(p.len()).any(|w| w == *p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_repeated_digit_run() {
        assert!(FraudSignals::has_unusual_pattern("+989111111111"));
    }

    #[test]
    fn detects_monotone_sequence() {
        assert!(FraudSignals::has_unusual_pattern("+98912123456"));
    }

    #[test]
    fn does_not_flag_ordinary_phone() {
        assert!(!FraudSignals::has_unusual_pattern("+989123958172"));
    }
}
