use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prediction_contest::{
    broker, cache, config::AppConfig, db, fraud, handlers, health, metrics, middleware, otp,
    session, session_cache, state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("starting prediction-api");

    let config = AppConfig::from_env()?;

    let metrics_recorder = metrics::MetricsRecorder::new();
    let metrics_handle = metrics_recorder.handle().clone();

    let pool = db::init_db(&config.db).await?;
    tracing::info!("database initialized");

    let cache_adapter = cache::CacheAdapter::connect(&config.cache)?;
    tracing::info!("cache connected");

    let broker_adapter = broker::connect_with_backoff(&config.broker).await?;
    broker_adapter.assert_queue(&config.broker.queue).await?;
    tracing::info!("broker connected");

    let fraud_signals = fraud::FraudSignals::new(cache_adapter.clone());
    let otp_service = otp::OtpService::new(cache_adapter.clone(), fraud_signals.clone(), config.otp.clone());
    let session_service = session::SessionService::new(
        pool.clone(),
        session_cache::SessionCache::new(cache_adapter.clone()),
        fraud_signals.clone(),
        config.session.clone(),
    );

    let app_state = AppState {
        pool: pool.clone(),
        cache: cache_adapter,
        broker: broker_adapter,
        otp: otp_service,
        session: session_service,
        fraud: fraud_signals,
        config: Arc::new(config.clone()),
    };

    // Scheduled session cleanup, mirroring the teacher's interval-driven
    // background workers.
    let cleanup_state = app_state.session.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match cleanup_state.cleanup_expired().await {
                Ok(n) if n > 0 => tracing::info!(rows = n, "expired sessions cleaned up"),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "session cleanup failed"),
            }
        }
    });

    // Rate limiter bucket cleanup.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            middleware::rate_limit::IP_LIMITER
                .cleanup_old_buckets(std::time::Duration::from_secs(600))
                .await;
            middleware::rate_limit::OTP_IP_LIMITER
                .cleanup_old_buckets(std::time::Duration::from_secs(600))
                .await;
        }
    });

    let metrics_router = if config.enable_metrics {
        Router::new()
            .route("/metrics", get(metrics::metrics_handler))
            .with_state(metrics_handle)
    } else {
        Router::new()
    };

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/auth/send-otp", post(handlers::auth::send_otp))
        .route("/auth/verify-otp", post(handlers::auth::verify_otp))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route(
            "/auth/sessions",
            get(handlers::auth::list_sessions).delete(handlers::auth::delete_all_sessions),
        )
        .route("/auth/sessions/{id}", delete(handlers::auth::delete_session))
        .route("/prediction/teams", get(handlers::prediction::teams))
        .route("/prediction", post(handlers::prediction::submit))
        .route("/prediction/result", get(handlers::prediction::results))
        .route("/prediction/leaderboard", get(handlers::prediction::leaderboard))
        .route(
            "/prediction/admin/trigger-prediction-process",
            post(handlers::prediction::trigger_processing),
        )
        .route(
            "/prediction/admin/processing-status",
            get(handlers::prediction::processing_status),
        )
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::logging::log_headers_middleware))
        .layer(axum::middleware::from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(metrics::track_request_metrics))
        .with_state(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
