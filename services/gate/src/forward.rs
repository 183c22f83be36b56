use crate::config::ForwardConfig;
use crate::event::Event;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors surfaced when forwarding an event downstream.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("downstream request failed: {0}")]
    Request(String),

    #[error("downstream returned status {0}")]
    Status(u16),
}

/// Seam for the single outbound call a gated event triggers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventForwarder: Send + Sync {
    async fn forward(&self, event: &Event) -> Result<(), ForwardError>;
}

/// HTTP forwarder: exactly one POST per allowed event, no retries.
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpForwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build forward HTTP client")?;

        info!(url = %config.url, "Event forwarder initialized");

        Ok(Self {
            client,
            url: config.url.clone(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl EventForwarder for HttpForwarder {
    async fn forward(&self, event: &Event) -> Result<(), ForwardError> {
        let mut request = self.client.post(&self.url).json(event);

        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status.as_u16()));
        }

        Ok(())
    }
}
