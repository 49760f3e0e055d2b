use anyhow::{Context, Result};
use apple_collector::api::{start_api_server, AppState};
use apple_collector::blob_store::{BlobStore, S3BlobStore};
use apple_collector::config::{BackendKind, Config};
use apple_collector::memory_store::{InMemoryBlobStore, InMemoryDocumentStore};
use apple_collector::metadata_store::{DocumentStore, PgDocumentStore};
use apple_collector::session::SessionRegistry;
use apple_collector::submission::SubmissionHandler;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Missing credentials or backend settings stop the service here
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        backend = ?config.service.backend,
        "Starting Apple Collector"
    );

    init_metrics(config.service.metrics_port)?;

    let (blob_store, document_store) = init_backends(&config).await?;

    let submissions = Arc::new(SubmissionHandler::new(
        blob_store,
        document_store,
        config.s3.key_prefix.clone(),
    ));

    let state = AppState {
        sessions: Arc::new(SessionRegistry::new(config.session_max_idle())),
        submissions,
        jpeg_quality: config.image.jpeg_quality,
    };

    info!("Collector service started successfully");

    start_api_server(state, &config.api, shutdown_signal())
        .await
        .context("API server error")?;

    info!("Collector service stopped");

    Ok(())
}

/// Build the blob and document stores for the configured backend
async fn init_backends(
    config: &Config,
) -> Result<(Arc<dyn BlobStore>, Arc<dyn DocumentStore>)> {
    match config.service.backend {
        BackendKind::Cloud => {
            let document_store = PgDocumentStore::new(&config.database)
                .await
                .context("Failed to initialize metadata store")?;

            if config.database.run_migrations {
                document_store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }

            let blob_store: Arc<dyn BlobStore> = Arc::new(
                S3BlobStore::new(&config.s3)
                    .await
                    .context("Failed to initialize S3 blob store")?,
            );
            let document_store: Arc<dyn DocumentStore> = Arc::new(document_store);

            Ok((blob_store, document_store))
        }
        BackendKind::Memory => {
            warn!("Using in-memory backends; submissions are lost on restart");
            let blob_store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
            let document_store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
            Ok((blob_store, document_store))
        }
    }
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
    metrics_exporter_prometheus::PrometheusBuilder::new()
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

    info!("Shutting down collector service");
}
