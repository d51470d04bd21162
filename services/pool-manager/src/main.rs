//! Pool manager
//!
//! Serves a pool of random numbers over HTTP. Mostly useful for exercising
//! pool settings against real timings.

use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warmpool_manager::{api, Pool, ServiceConfig, TracingLogger};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env()?;

    // Prefer RUST_LOG, fall back to WARMPOOL_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting pool manager");
    info!(listen_addr = %config.listen_addr, pool = %config.pool.pool_name, "Configuration loaded");

    let pool = Pool::builder(config.pool.clone())
        .item_factory(|| async { Ok::<_, anyhow::Error>(rand::random::<f64>()) })
        .logger(TracingLogger)
        .build()?;
    pool.start()?;

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP server listening");

    let served = axum::serve(listener, api::create_router(pool.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }

    info!("Stopping pool");
    if tokio::time::timeout(SHUTDOWN_GRACE, pool.shutdown()).await.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Pool workers did not finish in time"
        );
    }

    info!("Pool manager stopped");
    served.map_err(Into::into)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
