//! Broker management API publisher
//!
//! Pushes downstream data to devices through the broker's REST publish
//! endpoint (`POST {base}/v4/mqtt/publish`). A publish succeeds only when the
//! broker answers HTTP 200 with an application code of 0.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::BrokerConfig;

/// Errors returned by a broker publisher
#[derive(Debug)]
pub enum PublishError {
    /// Transport failure or timeout
    Http(String),
    /// Unexpected HTTP status
    Status(u16),
    /// Broker answered with a non-zero application code
    Rejected(i64),
    /// Response body did not decode
    Decode(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Http(e) => write!(f, "publish request failed: {}", e),
            PublishError::Status(status) => write!(f, "broker returned status {}", status),
            PublishError::Rejected(code) => write!(f, "broker rejected publish with code {}", code),
            PublishError::Decode(e) => write!(f, "invalid broker response: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PublishError::Decode(err.to_string())
        } else {
            PublishError::Http(err.to_string())
        }
    }
}

/// Message to publish to a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    /// Full device-facing topic (`{device}/...`)
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
    #[serde(rename = "clientid")]
    pub client_id: String,
}

impl PublishRequest {
    /// Build a request carrying a JSON value
    ///
    /// String values are sent verbatim, anything else as JSON text.
    pub fn json(topic: String, value: &Value, qos: u8, client_id: &str) -> Self {
        let payload = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            topic,
            payload,
            qos,
            retain: false,
            client_id: client_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    code: i64,
}

/// Outbound publish toward devices
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, request: PublishRequest) -> Result<(), PublishError>;
}

/// [`BrokerPublisher`] backed by the EMQX v4 REST API
pub struct EmqxPublisher {
    client: Client,
    url: String,
    username: String,
    password: String,
}

impl EmqxPublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self, PublishError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/v4/mqtt/publish", config.base_url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl BrokerPublisher for EmqxPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PublishError::Status(status.as_u16()));
        }

        let body: PublishResponse = response.json().await?;
        if body.code != 0 {
            return Err(PublishError::Rejected(body.code));
        }

        debug!("published to {}", request.topic);
        Ok(())
    }
}
