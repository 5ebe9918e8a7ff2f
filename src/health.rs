use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;
use std::time::SystemTime;

use crate::cache::CacheAdapter;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: u64,
    version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: CheckStatus,
    cache: CheckStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    database: bool,
    cache: bool,
}

#[derive(Clone)]
pub struct HealthState {
    pub pool: PgPool,
    pub cache: CacheAdapter,
}

/// Liveness probe — 200 OK iff the process is alive, no dependency checks.
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe — 200 OK only once the database and cache are both
/// reachable; 503 otherwise, so a load balancer stops sending traffic.
pub async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessResponse>) {
    let db_ready = crate::db::ping(&state.pool).await;
    let cache_ready = state.cache.ping().await;
    let ready = db_ready && cache_ready;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            checks: ReadinessChecks {
                database: db_ready,
                cache: cache_ready,
            },
        }),
    )
}

/// Detailed health information for operator dashboards.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let db_healthy = crate::db::ping(&state.pool).await;
    let cache_healthy = state.cache.ping().await;
    let overall_healthy = db_healthy && cache_healthy;

    let status = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    (
        status,
        Json(HealthResponse {
            status: if overall_healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: check_status(db_healthy),
                cache: check_status(cache_healthy),
            },
        }),
    )
}

fn check_status(healthy: bool) -> CheckStatus {
    if healthy {
        CheckStatus::Healthy
    } else {
        CheckStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
