use chrono::Utc;
use prediction_contest::db::*;
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/prediction_test".to_string());

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .expect("failed to connect to test database")
}

async fn cleanup_test_data(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE results, predictions, sessions, users, teams CASCADE")
        .execute(pool)
        .await
        .expect("failed to truncate test tables");
}

#[tokio::test]
async fn user_upsert_by_phone_is_idempotent() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let first = upsert_user_by_phone(&pool, "+989123456789")
        .await
        .expect("first upsert failed");
    let second = upsert_user_by_phone(&pool, "+989123456789")
        .await
        .expect("second upsert failed");

    assert_eq!(first.id, second.id);
    assert_eq!(first.phone, "+989123456789");
    assert!(second.last_login_at >= first.last_login_at);
}

#[tokio::test]
async fn session_lifecycle_insert_lookup_delete() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let user = upsert_user_by_phone(&pool, "+989111111111").await.unwrap();
    let expires_at = Utc::now() + chrono::Duration::days(30);

    let session = insert_session(
        &pool,
        user.id,
        "access-hash",
        "refresh-hash",
        Some("test-agent"),
        Some("127.0.0.1"),
        expires_at,
    )
    .await
    .expect("insert_session failed");

    let fetched = get_session(&pool, session.id)
        .await
        .unwrap()
        .expect("session not found");
    assert_eq!(fetched.user_id, user.id);
    assert_eq!(fetched.access_hash, "access-hash");

    let recent = recent_non_expired_sessions(&pool, 10).await.unwrap();
    assert!(recent.iter().any(|s| s.id == session.id));

    let deleted = delete_session(&pool, session.id, user.id).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(get_session(&pool, session.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unscored_submissions_excludes_results_already_inserted() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let user = upsert_user_by_phone(&pool, "+989222222222").await.unwrap();

    let scored = insert_submission(&pool, user.id, json!({"A": ["t1", "t2"]}))
        .await
        .unwrap();
    let unscored = insert_submission(&pool, user.id, json!({"A": ["t3", "t4"]}))
        .await
        .unwrap();

    insert_result(&pool, scored.id, user.id, 100, json!({"rule": "AllCorrect"}))
        .await
        .unwrap()
        .expect("first insert_result should succeed");

    let pending = unscored_submissions(&pool, 100).await.unwrap();
    assert!(pending.iter().any(|s| s.id == unscored.id));
    assert!(!pending.iter().any(|s| s.id == scored.id));
}

#[tokio::test]
async fn insert_result_is_a_noop_on_duplicate_submission_id() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let user = upsert_user_by_phone(&pool, "+989333333333").await.unwrap();
    let submission = insert_submission(&pool, user.id, json!({"A": ["t1"]}))
        .await
        .unwrap();

    let first = insert_result(&pool, submission.id, user.id, 80, json!({"rule": "TwoMisplaced"}))
        .await
        .unwrap();
    assert!(first.is_some());

    // A second worker racing the same job should see a silent no-op,
    // not a constraint-violation error.
    let second = insert_result(&pool, submission.id, user.id, 60, json!({"rule": "ThreeMisplaced"}))
        .await
        .unwrap();
    assert!(second.is_none());

    assert!(result_exists_for_submission(&pool, submission.id).await.unwrap());
}

#[tokio::test]
async fn leaderboard_orders_by_score_then_earliest_processed() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = upsert_user_by_phone(&pool, "+989444444444").await.unwrap();
    let bob = upsert_user_by_phone(&pool, "+989555555555").await.unwrap();

    let alice_sub = insert_submission(&pool, alice.id, json!({})).await.unwrap();
    let bob_sub = insert_submission(&pool, bob.id, json!({})).await.unwrap();

    insert_result(&pool, bob_sub.id, bob.id, 60, json!({})).await.unwrap();
    insert_result(&pool, alice_sub.id, alice.id, 100, json!({})).await.unwrap();

    let board = leaderboard(&pool, 10).await.unwrap();
    assert_eq!(board[0].user_id, alice.id);
    assert_eq!(board[0].total_score, 100);
    assert_eq!(board[1].user_id, bob.id);
}

#[tokio::test]
async fn ping_succeeds_against_a_live_pool() {
    let pool = setup_test_db().await;
    assert!(ping(&pool).await);
}

#[tokio::test]
async fn new_user_has_no_sessions_and_empty_inbox() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let user = upsert_user_by_phone(&pool, "+989666666666").await.unwrap();
    let sessions = list_sessions_for_user(&pool, user.id).await.unwrap();
    let results = results_for_user(&pool, user.id).await.unwrap();

    assert!(sessions.is_empty());
    assert!(results.is_empty());
}
