use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gate service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Rate table configuration
    #[serde(default)]
    pub table: TableConfig,
    /// Per-command grace periods
    #[serde(default)]
    pub rates: RatesConfig,
    /// Downstream forwarding configuration
    pub forward: ForwardConfig,
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

/// Rate table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Table holding the last-seen timestamp records
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for DynamoDB Local, LocalStack, etc.)
    pub endpoint_url: Option<String>,
}

/// Grace periods applied per command
#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    /// Minimum seconds between accepted "open" events per user
    #[serde(default = "default_open_grace_secs")]
    pub open_grace_secs: u64,
    /// Minimum seconds between accepted "unknown" events (global)
    #[serde(default = "default_unknown_grace_secs")]
    pub unknown_grace_secs: u64,
}

/// Downstream forwarding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// URL receiving allowed events
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_forward_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional bearer token for the downstream endpoint
    pub token: Option<String>,
}

/// API configuration for the event ingress
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
    "porter-gate".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_table_name() -> String {
    "porter-rate".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_open_grace_secs() -> u64 {
    60
}

fn default_unknown_grace_secs() -> u64 {
    30
}

fn default_forward_timeout_secs() -> u64 {
    5
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8081
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "porter-gate")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9091)?
            // Add config file if present
            .add_source(config::File::with_name("config/gate").required(false))
            .add_source(config::File::with_name("/etc/porter/gate").required(false))
            // Override with environment variables
            // GATE__RATES__OPEN_GRACE_SECS -> rates.open_grace_secs
            .add_source(
                config::Environment::with_prefix("GATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Grace period for "open" events as Duration
    pub fn open_grace(&self) -> Duration {
        Duration::from_secs(self.rates.open_grace_secs)
    }

    /// Grace period for "unknown" events as Duration
    pub fn unknown_grace(&self) -> Duration {
        Duration::from_secs(self.rates.unknown_grace_secs)
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

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            open_grace_secs: default_open_grace_secs(),
            unknown_grace_secs: default_unknown_grace_secs(),
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
    fn test_default_values() {
        assert_eq!(default_open_grace_secs(), 60);
        assert_eq!(default_unknown_grace_secs(), 30);
        assert_eq!(default_table_name(), "porter-rate");
    }

    #[test]
    fn test_grace_durations() {
        let config = Config {
            service: ServiceConfig::default(),
            table: TableConfig::default(),
            rates: RatesConfig {
                open_grace_secs: 120,
                unknown_grace_secs: 15,
            },
            forward: ForwardConfig {
                url: "http://localhost:8082/notify".to_string(),
                timeout_secs: 5,
                token: None,
            },
            api: ApiConfig::default(),
        };

        assert_eq!(config.open_grace(), Duration::from_secs(120));
        assert_eq!(config.unknown_grace(), Duration::from_secs(15));
    }
}
