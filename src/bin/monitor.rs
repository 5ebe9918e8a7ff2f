//! One-shot operator tool: prints processing progress and queue depth,
//! then exits. A lightweight alternative to polling the admin HTTP
//! route when no API instance is reachable from the operator's shell.

use prediction_contest::{broker, cache, config::AppConfig, db, dispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = AppConfig::from_env()?;

    let pool = db::init_db(&config.db).await?;
    let cache_adapter = cache::CacheAdapter::connect(&config.cache)?;
    let broker_adapter = broker::connect_with_backoff(&config.broker).await?;

    let status =
        dispatcher::processing_status(&pool, &cache_adapter, &broker_adapter, &config.broker.queue).await?;

    println!(
        "total={} processed={} pending={} queue_depth={}",
        status.total, status.processed, status.pending, status.queue_depth
    );

    Ok(())
}
