use prediction_contest::cache::CacheAdapter;
use prediction_contest::config::{CacheConfig, SessionConfig};
use prediction_contest::db;
use prediction_contest::fraud::FraudSignals;
use prediction_contest::session::{RequestContext, SessionService};
use prediction_contest::session_cache::SessionCache;
use std::time::Duration;

async fn setup_test_db() -> sqlx::PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/prediction_test".to_string());

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .expect("failed to connect to test database")
}

fn setup_test_cache() -> CacheAdapter {
    let host = std::env::var("TEST_REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
    let config = CacheConfig {
        host,
        port: std::env::var("TEST_REDIS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6379),
        password: None,
        default_ttl: Duration::from_secs(60),
    };
    CacheAdapter::connect(&config).expect("failed to connect to test redis")
}

fn test_session_config() -> SessionConfig {
    SessionConfig {
        bcrypt_rounds: 4, // low cost, fast tests
        token_length: 32,
        access_ttl: Duration::from_secs(900),
        refresh_ttl: Duration::from_secs(2_592_000),
        cleanup_cron: "0 * * * *".to_string(),
        enable_ip_validation: false,
        enable_user_agent_validation: false,
        recent_lookup_limit: 5,
        bulk_refresh_limit: 100,
    }
}

async fn make_service() -> (SessionService, sqlx::PgPool) {
    let pool = setup_test_db().await;
    sqlx::query("TRUNCATE TABLE sessions, users CASCADE")
        .execute(&pool)
        .await
        .unwrap();
    let cache = setup_test_cache();
    let fraud = FraudSignals::new(cache.clone());
    let session_cache = SessionCache::new(cache);
    let service = SessionService::new(pool.clone(), session_cache, fraud, test_session_config());
    (service, pool)
}

#[tokio::test]
async fn create_then_validate_round_trips_through_the_cache() {
    let (service, pool) = make_service().await;
    let user = db::upsert_user_by_phone(&pool, "+989888000001").await.unwrap();

    let issued = service
        .create_session(
            user.id,
            RequestContext {
                user_agent: Some("integration-test"),
                address: Some("127.0.0.1"),
            },
        )
        .await
        .expect("create_session failed");

    let validated = service
        .validate_session(
            &issued.access_token,
            RequestContext {
                user_agent: Some("integration-test"),
                address: Some("127.0.0.1"),
            },
        )
        .await
        .expect("validate_session failed");

    assert_eq!(validated.id, issued.session.id);
    assert_eq!(validated.user_id, user.id);
}

#[tokio::test]
async fn validate_falls_back_to_db_scan_on_cache_miss() {
    let (service, pool) = make_service().await;
    let user = db::upsert_user_by_phone(&pool, "+989888000002").await.unwrap();

    let issued = service
        .create_session(user.id, RequestContext { user_agent: None, address: None })
        .await
        .unwrap();

    // Purge the cache entry the access token would normally resolve
    // through, forcing `validate_session` onto its DB-scan fallback.
    let direct_cache = setup_test_cache();
    let _ = direct_cache
        .del(&format!(
            "session:token:{}",
            &issued.access_token[..16]
        ))
        .await;

    let validated = service
        .validate_session(&issued.access_token, RequestContext { user_agent: None, address: None })
        .await
        .expect("validate_session should fall back to the DB scan");
    assert_eq!(validated.id, issued.session.id);
}

#[tokio::test]
async fn refresh_reissues_access_token_without_rotating_refresh_token() {
    let (service, pool) = make_service().await;
    let user = db::upsert_user_by_phone(&pool, "+989888000003").await.unwrap();

    let issued = service
        .create_session(user.id, RequestContext { user_agent: None, address: None })
        .await
        .unwrap();

    let (refreshed_session, new_access_token) = service
        .refresh_session(&issued.refresh_token)
        .await
        .expect("refresh_session failed");

    assert_eq!(refreshed_session.id, issued.session.id);
    assert_ne!(new_access_token, issued.access_token);

    // The refresh token itself is never rotated; it must still resolve
    // to the same session on a second refresh.
    let (_, second_access_token) = service
        .refresh_session(&issued.refresh_token)
        .await
        .expect("second refresh with the same refresh token should succeed");
    assert_ne!(second_access_token, new_access_token);
}

#[tokio::test]
async fn delete_session_removes_it_and_leaves_others_for_the_user_intact() {
    let (service, pool) = make_service().await;
    let user = db::upsert_user_by_phone(&pool, "+989888000004").await.unwrap();

    let first = service
        .create_session(user.id, RequestContext { user_agent: None, address: None })
        .await
        .unwrap();
    let second = service
        .create_session(user.id, RequestContext { user_agent: None, address: None })
        .await
        .unwrap();

    let deleted = service.delete_session(first.session.id, user.id).await.unwrap();
    assert!(deleted);

    let remaining = service.list_sessions(user.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second.session.id);
}
