use anyhow::{Context, Result};
use gallery_service::api::{start_api_server, AppState};
use gallery_service::classifier::{HuggingFaceClassifier, NaturalPhotoClassifier};
use gallery_service::config::Config;
use gallery_service::gallery::Gallery;
use gallery_service::identity::OAuthIdentityProvider;
use gallery_service::image_store::S3ImageStore;
use gallery_service::metadata_store::{MetadataStore, PhotoStore};
use gallery_service::upload_pipeline::UploadPipeline;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Realist Gallery Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let metadata_store = MetadataStore::new(&config.database)
        .await
        .context("Failed to initialize metadata store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        metadata_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let photo_store: Arc<dyn PhotoStore> = Arc::new(metadata_store);
    let image_store = Arc::new(S3ImageStore::new(&config.s3).await);

    let classifier = HuggingFaceClassifier::new(&config.classifier, config.classifier_timeout())
        .context("Failed to initialize image classifier")?;

    let identity = OAuthIdentityProvider::new(&config.identity)
        .context("Failed to initialize identity provider")?;

    let photos = photo_store
        .list_all()
        .await
        .context("Failed to load gallery")?;
    info!(photos = photos.len(), "Gallery loaded");

    let pipeline = UploadPipeline::new(
        NaturalPhotoClassifier::new(Arc::new(classifier)),
        image_store.clone(),
        photo_store.clone(),
    );

    let api_state = AppState::new(
        pipeline,
        photo_store,
        image_store,
        Arc::new(identity),
        Gallery::from_records(photos),
    );

    start_api_server(
        api_state,
        &config.api,
        config.identity.secure_cookies,
        shutdown_signal(),
    )
    .await?;

    info!("Gallery service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

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
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutting down gallery service");
}
