use crate::config::WebhookConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors surfaced when firing the door webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(String),

    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Seam for the single outbound call a door event triggers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn trigger(&self) -> Result<(), WebhookError>;
}

/// Door webhook client: one POST of the configured static payload.
pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    post_data: serde_json::Value,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build webhook HTTP client")?;

        // The payload is fixed at configuration time; the webhook target
        // decides what it means.
        let post_data = match config.post_data.as_deref() {
            Some(raw) => serde_json::from_str(raw).context("Invalid webhook post data")?,
            None => serde_json::json!({}),
        };

        info!(url = %config.url, "Door webhook client initialized");

        Ok(Self {
            client,
            url: config.url.clone(),
            post_data,
        })
    }
}

#[async_trait]
impl WebhookPoster for WebhookClient {
    async fn trigger(&self) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.post_data)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebhookError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook_config(post_data: Option<&str>) -> WebhookConfig {
        WebhookConfig {
            url: "http://localhost:9000/hook".to_string(),
            grace_secs: 60,
            timeout_secs: 5,
            post_data: post_data.map(String::from),
        }
    }

    #[test]
    fn test_missing_post_data_defaults_to_empty_object() {
        let client = WebhookClient::new(&webhook_config(None)).unwrap();
        assert_eq!(client.post_data, serde_json::json!({}));
    }

    #[test]
    fn test_post_data_is_parsed() {
        let client = WebhookClient::new(&webhook_config(Some(r#"{"action": "open"}"#))).unwrap();
        assert_eq!(client.post_data["action"], "open");
    }

    #[test]
    fn test_invalid_post_data_is_rejected() {
        assert!(WebhookClient::new(&webhook_config(Some("not json"))).is_err());
    }
}
