//! Conversion worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alphavid_queue::JobQueue;
use alphavid_storage::StorageGateway;
use alphavid_store::{RecordStore, RedisRecordStore};
use alphavid_worker::{Dispatcher, JobExecutor, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for rediss:// and HTTPS endpoints)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Starting alphavid-worker");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store: Arc<dyn RecordStore> = Arc::new(
        RedisRecordStore::from_env()
            .await
            .context("failed to connect record store")?,
    );
    let storage = Arc::new(
        StorageGateway::from_env()
            .await
            .context("failed to build storage gateway")?,
    );
    info!("Storage backend: {}", storage.backend_name());

    let queue = JobQueue::from_env().context("failed to create job queue")?;
    let dispatcher = Dispatcher::new(config.clone(), Arc::clone(&store), storage);
    let executor = Arc::new(JobExecutor::new(config, queue, dispatcher, store));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        return Err(e.into());
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,alphavid=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
