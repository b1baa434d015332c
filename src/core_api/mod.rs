//! Core platform REST client
//!
//! Token validation, subscription entity CRUD and entity property lookups.
//! Every request carries the system identity header:
//!
//! ```text
//! x-tKeel-auth: base64("tenant={tenant}&user={user}&role={role}")
//! ```

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::CoreConfig;

/// Header carrying the system identity
pub const AUTH_HEADER: &str = "x-tKeel-auth";

/// Application-level success code of the token endpoint
const TOKEN_OK: i64 = 200;

/// Errors returned by the core platform client
#[derive(Debug)]
pub enum CoreApiError {
    /// Transport failure or timeout
    Http(String),
    /// Unexpected HTTP status
    Status(u16),
    /// Application-level rejection
    Rejected { code: i64, msg: String },
    /// Response body did not decode
    Decode(String),
    /// Base url cannot carry path segments
    InvalidUrl(String),
}

impl fmt::Display for CoreApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreApiError::Http(e) => write!(f, "request failed: {}", e),
            CoreApiError::Status(status) => write!(f, "unexpected status {}", status),
            CoreApiError::Rejected { code, msg } => write!(f, "rejected ({}): {}", code, msg),
            CoreApiError::Decode(e) => write!(f, "invalid response: {}", e),
            CoreApiError::InvalidUrl(e) => write!(f, "invalid core url: {}", e),
        }
    }
}

impl std::error::Error for CoreApiError {}

impl From<reqwest::Error> for CoreApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoreApiError::Decode(err.to_string())
        } else {
            CoreApiError::Http(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreApiError>;

/// Entity a device token belongs to
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: TokenInfo,
}

/// Delivery mode of a core subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionMode {
    #[serde(rename = "onChange")]
    OnChange,
    #[serde(rename = "realtime")]
    Realtime,
}

/// Continuous query the core evaluates on behalf of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionObject {
    pub pubsub_name: String,
    pub topic: String,
    pub mode: SubscriptionMode,
    pub filter: String,
    pub source: String,
    pub target: String,
}

/// Create-subscription call
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub id: String,
    pub owner: String,
    pub body: SubscriptionObject,
}

/// Core platform operations used by the bridge
#[async_trait]
pub trait CoreApi: Send + Sync {
    /// Resolve a device token; fails unless the core reports success
    async fn token_info(&self, secret: &str) -> Result<TokenInfo>;

    /// Create a subscription entity (an existing entity with the same id is success)
    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<()>;

    /// Delete a subscription entity (a missing entity is success)
    async fn delete_subscription(&self, id: &str, owner: &str) -> Result<()>;

    /// Current attribute values of an entity, restricted to `keys` when non-empty
    async fn entity_attributes(&self, owner: &str, entity_id: &str, keys: &[String])
        -> Result<Value>;
}

/// Build the system identity header value
pub fn auth_header_value(tenant: &str, user: &str, role: &str) -> String {
    STANDARD.encode(format!("tenant={}&user={}&role={}", tenant, user, role))
}

/// HTTP implementation of [`CoreApi`]
pub struct HttpCoreApi {
    client: Client,
    base_url: Url,
    auth: String,
    source: String,
}

impl HttpCoreApi {
    pub fn new(config: &CoreConfig, source: &str) -> Result<Self> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| CoreApiError::InvalidUrl(e.to_string()))?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth: auth_header_value(&config.tenant, &config.user, &config.role),
            source: source.to_string(),
        })
    }

    /// Append path segments to the base url, percent-encoding each one
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CoreApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl CoreApi for HttpCoreApi {
    async fn token_info(&self, secret: &str) -> Result<TokenInfo> {
        let response = self
            .client
            .get(self.url(&["security", "v1", "entity", "info", secret])?)
            .header(AUTH_HEADER, &self.auth)
            .send()
            .await?;

        // The endpoint reports failures in the body, so the status is not checked first
        let body: TokenResponse = response.json().await?;
        if body.code != TOKEN_OK {
            return Err(CoreApiError::Rejected {
                code: body.code,
                msg: body.msg,
            });
        }
        Ok(body.data)
    }

    async fn create_subscription(&self, request: &SubscriptionRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url(&["core", "v1", "subscriptions"])?)
            .query(&[
                ("id", request.id.as_str()),
                ("source", self.source.as_str()),
                ("owner", request.owner.as_str()),
                ("type", "SUBSCRIPTION"),
            ])
            .header(AUTH_HEADER, &self.auth)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            debug!("subscription {} created (status {})", request.id, status);
            Ok(())
        } else {
            Err(CoreApiError::Status(status.as_u16()))
        }
    }

    async fn delete_subscription(&self, id: &str, owner: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&["core", "v1", "subscriptions", id])?)
            .query(&[
                ("source", self.source.as_str()),
                ("owner", owner),
                ("type", "SUBSCRIPTION"),
            ])
            .header(AUTH_HEADER, &self.auth)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("subscription {} deleted (status {})", id, status);
            Ok(())
        } else {
            Err(CoreApiError::Status(status.as_u16()))
        }
    }

    async fn entity_attributes(
        &self,
        owner: &str,
        entity_id: &str,
        keys: &[String],
    ) -> Result<Value> {
        let response = self
            .client
            .get(self.url(&["core", "v1", "entities", entity_id])?)
            .query(&[
                ("source", self.source.as_str()),
                ("owner", owner),
                ("type", "device"),
            ])
            .header(AUTH_HEADER, &self.auth)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreApiError::Status(status.as_u16()));
        }

        let entity: Value = response.json().await?;
        Ok(select_attributes(&entity, keys))
    }
}

/// Pick `properties.attributes.<key>` for each requested key
///
/// An empty key list selects every attribute; unknown keys are omitted.
pub fn select_attributes(entity: &Value, keys: &[String]) -> Value {
    let attributes = entity
        .pointer("/properties/attributes")
        .and_then(Value::as_object);

    let Some(attributes) = attributes else {
        return Value::Object(Map::new());
    };

    if keys.is_empty() {
        return Value::Object(attributes.clone());
    }

    let selected = keys
        .iter()
        .filter_map(|key| attributes.get(key).map(|v| (key.clone(), v.clone())))
        .collect::<Map<String, Value>>();
    Value::Object(selected)
}
