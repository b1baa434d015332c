//! External endpoint configuration
//!
//! Settings for the collaborators the bridge talks to: the core platform, the
//! broker management API, the event stream and the state store.

use std::time::Duration;

use serde::Deserialize;

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Core platform REST API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL of the core APIs (usually routed through the sidecar)
    pub base_url: String,
    /// Request timeout (e.g., "5s")
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// System identity carried in the auth header
    pub tenant: String,
    pub user: String,
    pub role: String,
    /// Pub/sub component the core delivers subscription notifications on
    pub subscription_pubsub: String,
    /// Topic the core delivers subscription notifications on
    pub subscription_topic: String,
    /// Source recorded on created subscription entities
    pub subscription_source: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3500/v1.0/invoke/keel/method/apis".to_string(),
            timeout: default_timeout(),
            tenant: "_tKeel_system".to_string(),
            user: "_tKeel_admin".to_string(),
            role: "admin".to_string(),
            subscription_pubsub: "iothub-pubsub".to_string(),
            subscription_topic: "sub-core".to_string(),
            subscription_source: "tkeel-device".to_string(),
        }
    }
}

/// Broker management API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker REST API (e.g., "http://emqx:8081/api")
    pub base_url: String,
    /// Basic auth credentials
    pub username: String,
    pub password: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// QoS used for downstream publishes
    pub qos: u8,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/api".to_string(),
            username: "admin".to_string(),
            password: "public".to_string(),
            timeout: default_timeout(),
            qos: 0,
        }
    }
}

/// Event stream configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventStreamConfig {
    /// Base URL of the pub/sub sidecar
    pub base_url: String,
    /// Pub/sub component name
    pub pubsub_name: String,
    /// Topic upstream envelopes are published on
    pub topic: String,
    /// Publish timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Buffered delivery reports before slow observers start lagging
    pub report_capacity: usize,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3500".to_string(),
            pubsub_name: "iothub-pubsub".to_string(),
            topic: "core-pub".to_string(),
            timeout: default_timeout(),
            report_capacity: 1024,
        }
    }
}

/// State store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart
    #[default]
    Memory,
    /// Embedded LSM store under `path`
    Fjall,
    /// Dapr state API, shared across replicas
    Dapr,
}

/// State store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Data directory for the fjall backend
    pub path: String,
    /// Sidecar base URL for the dapr backend
    pub dapr_base_url: String,
    /// State component name for the dapr backend
    pub store_name: String,
    /// Request timeout for the dapr backend
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: String::new(),
            dapr_base_url: "http://localhost:3500".to_string(),
            store_name: "iothub-private-store".to_string(),
            timeout: default_timeout(),
        }
    }
}
