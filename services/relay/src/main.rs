//! Porter Relay
//!
//! Stateless validate-then-forward handlers for the Porter door automation
//! platform: chat notifications for detection events and the "door open"
//! webhook trigger, rate-gated against the shared rate table. Each accepted
//! event results in exactly one outbound call; failures are logged and
//! surfaced, never retried.

mod chat;
mod config;
mod handlers;
mod webhook;

use anyhow::{Context, Result};
use chat::ChatClient;
use config::Config;
use handlers::{start_api_server, AppState};
use porter_gate::rate_gate::{DynamoClaimStore, RateGate};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webhook::WebhookClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Porter relay service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        DynamoClaimStore::new(&config.table)
            .await
            .context("Failed to initialize rate table store")?,
    );

    let gate = Arc::new(RateGate::new(store));

    let chat =
        Arc::new(ChatClient::new(&config.chat).context("Failed to initialize chat client")?);

    let webhook = Arc::new(
        WebhookClient::new(&config.webhook).context("Failed to initialize webhook client")?,
    );

    let state = AppState {
        chat,
        webhook,
        gate,
        chat_config: config.chat.clone(),
        door_grace_secs: config.webhook.grace_secs,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Relay service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down relay service");

    api_handle.abort();

    info!("Relay service stopped");

    Ok(())
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
