use prediction_contest::{broker, cache, config::AppConfig, db, dispatcher, worker_job};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("starting prediction-worker");

    let config = AppConfig::from_env()?;

    let pool = db::init_db(&config.db).await?;
    tracing::info!("database initialized");

    let cache_adapter = cache::CacheAdapter::connect(&config.cache)?;
    tracing::info!("cache connected");

    let broker_adapter = broker::connect_with_backoff(&config.broker).await?;
    broker_adapter.assert_queue(&config.broker.queue).await?;
    tracing::info!("broker connected");

    // Dispatcher loop: periodically scans for unscored submissions and
    // publishes jobs. Runs alongside the consumer in this same process
    // so a single binary covers both halves of C11/C12.
    let dispatch_pool = pool.clone();
    let dispatch_cache = cache_adapter.clone();
    let dispatch_broker = broker_adapter.clone();
    let dispatch_config = config.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            match dispatcher::dispatch_once(
                &dispatch_pool,
                &dispatch_cache,
                &dispatch_broker,
                &dispatch_config.broker.queue,
                &dispatch_config.dispatch,
            )
            .await
            {
                Ok(report) if report.queued > 0 => {
                    tracing::info!(queued = report.queued, mode = report.mode, "dispatch pass");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "dispatch pass failed"),
            }
        }
    });

    let consume_pool = pool.clone();
    let consume_cache = cache_adapter.clone();
    let queue = config.broker.queue.clone();

    tokio::select! {
        result = broker_adapter.consume(&queue, move |payload| {
            let pool = consume_pool.clone();
            let cache = consume_cache.clone();
            async move {
                let job: worker_job::ScoringJob = serde_json::from_value(payload)?;
                worker_job::process_job(&pool, &cache, job).await
            }
        }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "consumer loop exited with error");
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

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
}
