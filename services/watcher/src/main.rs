use anyhow::{bail, Context, Result};
use porter_watcher::config::Config;
use porter_watcher::detect::{Detector, FrameDiffDetector};
use porter_watcher::display::DisplaySink;
use porter_watcher::pipeline::{Pipeline, PipelineSettings};
use porter_watcher::source::{FrameSource, SyntheticSource};
use porter_watcher::upload::{CropUploader, S3BlobStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Porter watcher service"
    );

    // Validate configuration
    config.validate()?;

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        S3BlobStore::new(&config.s3)
            .await
            .context("Failed to initialize crop store")?,
    );

    let display = DisplaySink::new().context("Failed to initialize display sink")?;
    let writer_handle = display.spawn_writer(PathBuf::from(&config.display.path));

    let uploader = CropUploader::new();
    let upload_handle = uploader.spawn_worker(store, config.s3.key_prefix.clone());

    let source = build_source(&config)?;
    let detector: Box<dyn Detector> = Box::new(FrameDiffDetector::default());

    let settings = PipelineSettings::from(&config);
    let mut pipeline = Pipeline::new(settings, source, detector, display.clone(), uploader);

    info!("Watcher service started successfully");

    // Run until the pipeline faults or a shutdown signal arrives. A
    // pipeline fault is fatal: no restart, no partial recovery.
    let result = tokio::select! {
        result = pipeline.run() => {
            result.map_err(anyhow::Error::from)
        }
        _ = shutdown_signal() => {
            info!("Shutting down watcher service");
            Ok(())
        }
    };

    // Stop the display writer; the flag takes effect after its current
    // blocking write returns. A writer still blocked waiting for a
    // consumer is reaped with the process.
    display.stop();
    upload_handle.abort();
    drop(writer_handle);

    if let Err(e) = &result {
        error!(error = %e, "Watcher pipeline terminated");
    } else {
        info!("Watcher service stopped");
    }

    result
}

/// Build the configured frame source.
fn build_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    match config.camera.source.as_str() {
        "synthetic" => Ok(Box::new(SyntheticSource::new(
            config.camera.width,
            config.camera.height,
            config.camera.fps,
        ))),
        other => bail!("Unknown frame source '{other}'"),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
