//! Persistence layer: sqlx queries backing users, sessions, submissions,
//! results, and teams. Connection pooling mirrors the teacher's
//! `PgPoolOptions`-based `init_db`.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::DbConfig;
use crate::models::{PredictionResult, Session, Submission, Team, User};

pub async fn init_db(config: &DbConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(config.timeout)
        .connect(&config.connection_url())
        .await?;
    Ok(pool)
}

// =============================================================================
// Users
// =============================================================================

/// Insert a new user or, if the phone already exists, refresh
/// `last_login_at` and return the existing row. One successful OTP
/// verification is the only path that creates or touches a user.
pub async fn upsert_user_by_phone(pool: &PgPool, phone: &str) -> Result<User, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, phone, created_at, updated_at, last_login_at)
        VALUES ($1, $2, $3, $3, $3)
        ON CONFLICT (phone) DO UPDATE
            SET last_login_at = EXCLUDED.last_login_at,
                updated_at = EXCLUDED.updated_at
        RETURNING id, phone, created_at, updated_at, last_login_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(phone)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn get_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, phone, created_at, updated_at, last_login_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

// =============================================================================
// Sessions (C7)
// =============================================================================

#[allow(clippy::too_many_arguments)]
pub async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    access_hash: &str,
    refresh_hash: &str,
    user_agent: Option<&str>,
    address: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<Session, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions
            (id, user_id, token_hash, refresh_token_hash, user_agent, ip_address, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
                  user_agent, ip_address as address, created_at, expires_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(access_hash)
    .bind(refresh_hash)
    .bind(user_agent)
    .bind(address)
    .bind(now)
    .bind(expires_at)
    .fetch_one(pool)
    .await
}

pub async fn get_session(pool: &PgPool, session_id: Uuid) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
               user_agent, ip_address as address, created_at, expires_at
        FROM sessions WHERE id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
}

/// Most recent `limit` non-expired sessions, newest first — the DB
/// fallback scan used when the cache misses (C7 validateSession step 3).
pub async fn recent_non_expired_sessions(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
               user_agent, ip_address as address, created_at, expires_at
        FROM sessions
        WHERE expires_at > now()
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Same scan, scoped to one user — used for refresh-token lookup.
pub async fn recent_non_expired_sessions_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
               user_agent, ip_address as address, created_at, expires_at
        FROM sessions
        WHERE user_id = $1 AND expires_at > now()
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn recent_sessions_for_user(
    pool: &PgPool,
    user_id: Uuid,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
               user_agent, ip_address as address, created_at, expires_at
        FROM sessions
        WHERE user_id = $1 AND created_at >= $2
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_sessions_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        SELECT id, user_id, token_hash as access_hash, refresh_token_hash as refresh_hash,
               user_agent, ip_address as address, created_at, expires_at
        FROM sessions
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn update_access_hash(pool: &PgPool, session_id: Uuid, new_hash: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET token_hash = $1 WHERE id = $2")
        .bind(new_hash)
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_session(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
        .bind(session_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_all_sessions_for_user(pool: &PgPool, user_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every expired session row; called on the scheduled cleanup
/// cadence. Returns the number of rows removed.
pub async fn cleanup_expired_sessions(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at < now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Submissions (C10)
// =============================================================================

pub async fn insert_submission(
    pool: &PgPool,
    user_id: Uuid,
    payload: serde_json::Value,
) -> Result<Submission, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, Submission>(
        r#"
        INSERT INTO predictions (id, user_id, predict, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, predict as payload, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(payload)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn get_submission(pool: &PgPool, submission_id: Uuid) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT id, user_id, predict as payload, created_at FROM predictions WHERE id = $1",
    )
    .bind(submission_id)
    .fetch_optional(pool)
    .await
}

/// Submissions with no corresponding result row yet — the outer
/// anti-join the dispatcher scans.
pub async fn unscored_submissions(pool: &PgPool, limit: i64) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        r#"
        SELECT p.id, p.user_id, p.predict as payload, p.created_at
        FROM predictions p
        LEFT JOIN results r ON r.prediction_id = p.id
        WHERE r.id IS NULL
        ORDER BY p.created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn count_unscored_submissions(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT count(*)
        FROM predictions p
        LEFT JOIN results r ON r.prediction_id = p.id
        WHERE r.id IS NULL
        "#,
    )
    .fetch_one(pool)
    .await
}

// =============================================================================
// Results (C12)
// =============================================================================

pub async fn result_exists_for_submission(pool: &PgPool, submission_id: Uuid) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM results WHERE prediction_id = $1")
        .bind(submission_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert exactly one result row. `ON CONFLICT (prediction_id) DO
/// NOTHING` plus the unique constraint on `prediction_id` is what makes
/// this safe under concurrent at-least-once delivery: a duplicate job
/// is a silent no-op rather than an error.
pub async fn insert_result(
    pool: &PgPool,
    submission_id: Uuid,
    user_id: Uuid,
    total_score: i32,
    details: serde_json::Value,
) -> Result<Option<PredictionResult>, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, PredictionResult>(
        r#"
        INSERT INTO results (id, prediction_id, user_id, total_score, details, processed_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (prediction_id) DO NOTHING
        RETURNING id, prediction_id as submission_id, user_id, total_score, details, processed_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(submission_id)
    .bind(user_id)
    .bind(total_score)
    .bind(details)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub async fn results_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<PredictionResult>, sqlx::Error> {
    sqlx::query_as::<_, PredictionResult>(
        r#"
        SELECT id, prediction_id as submission_id, user_id, total_score, details, processed_at
        FROM results
        WHERE user_id = $1
        ORDER BY processed_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<PredictionResult>, sqlx::Error> {
    sqlx::query_as::<_, PredictionResult>(
        r#"
        SELECT id, prediction_id as submission_id, user_id, total_score, details, processed_at
        FROM results
        ORDER BY total_score DESC, processed_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// =============================================================================
// Teams (ground truth)
// =============================================================================

pub async fn list_teams(pool: &PgPool) -> Result<Vec<Team>, sqlx::Error> {
    sqlx::query_as::<_, Team>(
        r#"
        SELECT id, fa_name as local_name, eng_name as english_name, "order", "group", flag
        FROM teams
        ORDER BY "order" ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
