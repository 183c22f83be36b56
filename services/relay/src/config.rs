use porter_gate::config::TableConfig;
use serde::Deserialize;

/// Main configuration for the relay service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Chat API configuration
    pub chat: ChatConfig,
    /// Door webhook configuration
    pub webhook: WebhookConfig,
    /// Rate table configuration (shared with the gate service)
    #[serde(default)]
    pub table: TableConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Chat API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Chat API base URL, trailing slash included
    #[serde(default = "default_chat_api_url")]
    pub api_url: String,
    /// Bearer token for the chat API
    pub token: String,
    /// Channel receiving door notifications
    pub channel: String,
    /// Public base URL for stored crop images
    #[serde(default = "default_image_base_url")]
    pub image_base_url: String,
    /// Bucket holding the crops
    pub bucket: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Log full chat payloads
    #[serde(default)]
    pub debug: bool,
}

impl ChatConfig {
    /// Public URL of a stored crop.
    pub fn image_url(&self, s3key: &str) -> String {
        format!("{}/{}/{}", self.image_base_url, self.bucket, s3key)
    }
}

/// Door webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL fired on accepted "open" events
    pub url: String,
    /// Minimum seconds between accepted door triggers
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional static JSON payload POSTed to the webhook
    pub post_data: Option<String>,
}

/// API configuration for the relay endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "porter-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9092
}

fn default_chat_api_url() -> String {
    "https://slack.com/api/".to_string()
}

fn default_image_base_url() -> String {
    "https://s3.amazonaws.com".to_string()
}

fn default_grace_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8082
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "porter-relay")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9092)?
            // Add config file if present
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/porter/relay").required(false))
            // Override with environment variables
            // RELAY__CHAT__TOKEN -> chat.token
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url() {
        let config = ChatConfig {
            api_url: default_chat_api_url(),
            token: "xoxb-test".to_string(),
            channel: "C123".to_string(),
            image_base_url: default_image_base_url(),
            bucket: "porter-faces".to_string(),
            timeout_secs: 5,
            debug: false,
        };

        assert_eq!(
            config.image_url("incoming/2024-01-15_10_30_45.jpg"),
            "https://s3.amazonaws.com/porter-faces/incoming/2024-01-15_10_30_45.jpg"
        );
    }
}
