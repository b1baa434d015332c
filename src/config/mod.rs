//! Configuration Module
//!
//! Provides TOML-based configuration for the iothub bridge with support for:
//! - Notification endpoint and metrics listeners
//! - Core platform, broker management API and event stream endpoints
//! - State store backend selection
//! - Environment variable overrides (IOTHUB__* prefix)

use std::net::SocketAddr;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use endpoints::{BrokerConfig, CoreConfig, EventStreamConfig, StoreBackend, StoreConfig};

mod endpoints;

/// Reserved client id used for messages the bridge injects into the broker
pub const DEFAULT_LOOPBACK_CLIENT_ID: &str = "@tkeel.iothub.internal.clientId";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Notification endpoint configuration
    pub server: ServerConfig,
    /// Core platform REST API
    pub core: CoreConfig,
    /// Broker management API used for downstream publishes
    pub broker: BrokerConfig,
    /// Event stream used for upstream envelopes
    pub event_stream: EventStreamConfig,
    /// Per-device state store
    pub store: StoreConfig,
    /// Bridge identity settings
    pub bridge: BridgeConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Notification endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address for core notifications and broker hook calls
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Bridge identity configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Client id stamped on downstream publishes; publishes from it are never re-ingested
    pub loopback_client_id: String,
    /// Source name carried by envelopes and subscription requests
    pub source: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            loopback_client_id: DEFAULT_LOOPBACK_CLIENT_ID.to_string(),
            source: "iothub".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    pub enabled: bool,
    /// HTTP bind address for metrics endpoint
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `IOTHUB__` prefix with double underscores for nesting:
    ///    - `IOTHUB__SERVER__BIND=0.0.0.0:8081` overrides `server.bind`
    ///    - `IOTHUB__STORE__BACKEND=dapr` overrides `store.backend`
    ///    - `IOTHUB__BROKER__PASSWORD=secret` overrides `broker.password`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("store.backend", "memory")?
            .set_default("metrics.enabled", false)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("IOTHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let urls = [
            ("core.base_url", &self.core.base_url),
            ("broker.base_url", &self.broker.base_url),
            ("event_stream.base_url", &self.event_stream.base_url),
        ];
        for (name, url) in urls {
            if url.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", name)));
            }
        }

        if self.bridge.loopback_client_id.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.loopback_client_id must not be empty".to_string(),
            ));
        }

        if self.broker.qos > 2 {
            return Err(ConfigError::Validation(
                "broker.qos must be 0, 1, or 2".to_string(),
            ));
        }

        if self.event_stream.report_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_stream.report_capacity must be greater than 0".to_string(),
            ));
        }

        match self.store.backend {
            StoreBackend::Fjall if self.store.path.is_empty() => {
                return Err(ConfigError::Validation(
                    "store.path is required for the fjall backend".to_string(),
                ));
            }
            StoreBackend::Dapr if self.store.dapr_base_url.is_empty() => {
                return Err(ConfigError::Validation(
                    "store.dapr_base_url is required for the dapr backend".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}
