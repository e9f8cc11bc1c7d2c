//! GifGroup API service binary.

use anyhow::{Context, Result};
use gifgroup_api::config::{Config, ObjectsBackend, StorageBackend};
use gifgroup_api::{
    start_api_server, AppState, AssetUploader, GifGroupService, KvStore, MemoryKvStore,
    MemoryObjectStore, ObjectStore, RecordStore, RedisKvStore, S3ObjectStore, SequenceManager,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting GifGroup API"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize stores
    let kv_store: Arc<dyn KvStore> = match config.storage.backend {
        StorageBackend::Redis => Arc::new(
            RedisKvStore::new(&config.redis)
                .await
                .context("Failed to initialize Redis store")?,
        ),
        StorageBackend::Memory => {
            warn!("Using in-memory record store; data is lost on exit");
            Arc::new(MemoryKvStore::new())
        }
    };

    let object_store: Arc<dyn ObjectStore> = match config.objects.backend {
        ObjectsBackend::S3 => Arc::new(
            S3ObjectStore::new(&config.s3)
                .await
                .context("Failed to initialize S3 object store")?,
        ),
        ObjectsBackend::Memory => {
            warn!("Using in-memory object store; uploads are lost on exit");
            Arc::new(MemoryObjectStore::new(config.s3.public_base_url()))
        }
    };

    // Recover id counters before accepting requests
    let sequences = Arc::new(SequenceManager::new(kv_store.clone()));
    sequences
        .recover_all()
        .await
        .context("Failed to recover id counters")?;

    let service = GifGroupService::new(
        sequences,
        Arc::new(RecordStore::new(kv_store.clone())),
        Arc::new(AssetUploader::new(
            object_store,
            config.s3.default_asset_path.clone(),
        )),
    );

    let shutdown = CancellationToken::new();

    let api_state = AppState {
        service,
        kv_store,
        shutdown: shutdown.clone(),
        request_timeout: config.request_timeout(),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    let mut api_handle =
        tokio::spawn(async move { start_api_server(api_state, &api_config, api_shutdown).await });

    info!("GifGroup API started successfully");

    // Wait for a shutdown signal, or for the server to stop on its own
    let server_exit = tokio::select! {
        _ = shutdown_signal() => None,
        res = &mut api_handle => Some(res),
    };

    shutdown.cancel();

    match server_exit {
        None => {
            info!("Shutting down GifGroup API");
            match api_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "API server error"),
                Err(e) => error!(error = %e, "API server task failed"),
            }
        }
        Some(Ok(Ok(()))) => warn!("API server exited without a shutdown signal"),
        Some(Ok(Err(e))) => return Err(e.context("API server failed")),
        Some(Err(e)) => return Err(anyhow::Error::new(e).context("API server task failed")),
    }

    info!("GifGroup API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
