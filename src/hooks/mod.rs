//! Hooks Module
//!
//! Broker hook surface. The broker reports every client, session and message
//! event through [`HookProvider`]; [`BridgeHooks`] routes the ones the bridge
//! cares about to authentication, subscription handling, ingest and the
//! connection lifecycle. The rest are acknowledged without action.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::ingest::UpstreamPipeline;
use crate::lifecycle::ConnectionLifecycle;
use crate::session::{resolve_identity, AuthGate, ConnectionInfo, Credentials, Protocol};
use crate::subscription::SubscriptionManager;
use crate::topic::owner_from_topic;


/// Every hook the bridge registers for
pub const HOOK_NAMES: [&str; 19] = [
    "client.connect",
    "client.connack",
    "client.connected",
    "client.disconnected",
    "client.authenticate",
    "client.check_acl",
    "client.subscribe",
    "client.unsubscribe",
    "session.created",
    "session.subscribed",
    "session.unsubscribed",
    "session.resumed",
    "session.discarded",
    "session.takeovered",
    "session.terminated",
    "message.publish",
    "message.delivered",
    "message.acked",
    "message.dropped",
];

/// Hook error types
#[derive(Debug)]
pub enum HookError {
    /// Bridge operation failed
    Bridge(BridgeError),
    /// No hook with this name
    UnknownHook(String),
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Bridge(e) => write!(f, "{}", e),
            HookError::UnknownHook(name) => write!(f, "Unknown hook: {}", name),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Bridge(e) => Some(e),
            HookError::UnknownHook(_) => None,
        }
    }
}

impl From<BridgeError> for HookError {
    fn from(err: BridgeError) -> Self {
        HookError::Bridge(err)
    }
}

/// Hook result type
pub type HookResult<T> = Result<T, HookError>;

/// Client details attached to client and session hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub node: String,
    #[serde(rename = "clientid")]
    pub client_id: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "peerhost")]
    pub peer_host: String,
    #[serde(rename = "sockport")]
    pub sock_port: u16,
    pub protocol: String,
    pub mountpoint: String,
}

impl ClientInfo {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            protocol: Protocol::from_name(&self.protocol),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Device identity of this client
    pub fn device_id(&self) -> String {
        resolve_identity(&self.credentials()).device_id
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            peer_host: self.peer_host.clone(),
            protocol: self.protocol.clone(),
            socket_port: self.sock_port,
        }
    }
}

/// Topic filter of a subscribe/unsubscribe request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicFilter {
    pub name: String,
    pub qos: u8,
}

/// Message attached to message hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub node: String,
    pub id: String,
    pub qos: u8,
    /// Client id of the publisher
    pub from: String,
    pub topic: String,
    /// Raw payload bytes, base64 encoded on the wire
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Access requested in an ACL check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    #[default]
    Publish,
    Subscribe,
}

/// Tri-state answer of valued hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuedResponse {
    /// Let the next hook decide
    Continue,
    /// Ignore this hook's answer
    Ignore,
    /// Stop evaluating hooks and use the value
    StopAndReturn(bool),
}

impl ValuedResponse {
    pub fn to_json(&self) -> Value {
        match self {
            ValuedResponse::Continue => json!({"type": "CONTINUE"}),
            ValuedResponse::Ignore => json!({"type": "IGNORE"}),
            ValuedResponse::StopAndReturn(value) => {
                json!({"type": "STOP_AND_RETURN", "bool_result": value})
            }
        }
    }
}

/// Broker hook provider
///
/// All methods have default implementations that acknowledge the event
/// without doing anything.
#[async_trait]
pub trait HookProvider: Send + Sync {
    /// Hooks to register when the broker loads the provider
    async fn on_provider_loaded(&self) -> Vec<String> {
        HOOK_NAMES.iter().map(|name| name.to_string()).collect()
    }

    async fn on_provider_unloaded(&self) {}

    async fn on_client_connect(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_client_connack(&self, _client: &ClientInfo, _result_code: &str) -> HookResult<()> {
        Ok(())
    }

    async fn on_client_connected(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_client_disconnected(&self, _client: &ClientInfo, _reason: &str) -> HookResult<()> {
        Ok(())
    }

    async fn on_client_authenticate(&self, _client: &ClientInfo) -> HookResult<ValuedResponse> {
        Ok(ValuedResponse::Continue)
    }

    async fn on_client_check_acl(
        &self,
        _client: &ClientInfo,
        _topic: &str,
        _action: AclAction,
    ) -> HookResult<ValuedResponse> {
        Ok(ValuedResponse::Continue)
    }

    async fn on_client_subscribe(
        &self,
        _client: &ClientInfo,
        _filters: &[TopicFilter],
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_client_unsubscribe(
        &self,
        _client: &ClientInfo,
        _filters: &[TopicFilter],
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_created(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_subscribed(
        &self,
        _client: &ClientInfo,
        _filter: &TopicFilter,
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_unsubscribed(
        &self,
        _client: &ClientInfo,
        _filter: &TopicFilter,
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_resumed(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_discarded(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_takeovered(&self, _client: &ClientInfo) -> HookResult<()> {
        Ok(())
    }

    async fn on_session_terminated(&self, _client: &ClientInfo, _reason: &str) -> HookResult<()> {
        Ok(())
    }

    async fn on_message_publish(&self, _message: &Message) -> HookResult<ValuedResponse> {
        Ok(ValuedResponse::Continue)
    }

    async fn on_message_delivered(&self, _client: &ClientInfo, _message: &Message) -> HookResult<()> {
        Ok(())
    }

    async fn on_message_acked(&self, _client: &ClientInfo, _message: &Message) -> HookResult<()> {
        Ok(())
    }

    async fn on_message_dropped(&self, _message: &Message, _reason: &str) -> HookResult<()> {
        Ok(())
    }
}

/// Arguments of any hook call, as sent over the wire
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookRequest {
    #[serde(rename = "clientinfo")]
    pub client: ClientInfo,
    pub topic_filters: Vec<TopicFilter>,
    pub message: Message,
    pub topic: String,
    pub action: AclAction,
    pub reason: String,
    pub result_code: String,
}

/// Call the hook named `name` on a provider
///
/// Valued hooks return their response; the others return `None`.
pub async fn invoke(
    provider: &dyn HookProvider,
    name: &str,
    request: &HookRequest,
) -> HookResult<Option<ValuedResponse>> {
    let client = &request.client;
    let first_filter = request.topic_filters.first().cloned().unwrap_or_default();

    match name {
        "client.connect" => provider.on_client_connect(client).await?,
        "client.connack" => provider.on_client_connack(client, &request.result_code).await?,
        "client.connected" => provider.on_client_connected(client).await?,
        "client.disconnected" => provider.on_client_disconnected(client, &request.reason).await?,
        "client.authenticate" => return provider.on_client_authenticate(client).await.map(Some),
        "client.check_acl" => {
            return provider
                .on_client_check_acl(client, &request.topic, request.action)
                .await
                .map(Some)
        }
        "client.subscribe" => provider.on_client_subscribe(client, &request.topic_filters).await?,
        "client.unsubscribe" => {
            provider
                .on_client_unsubscribe(client, &request.topic_filters)
                .await?
        }
        "session.created" => provider.on_session_created(client).await?,
        "session.subscribed" => provider.on_session_subscribed(client, &first_filter).await?,
        "session.unsubscribed" => provider.on_session_unsubscribed(client, &first_filter).await?,
        "session.resumed" => provider.on_session_resumed(client).await?,
        "session.discarded" => provider.on_session_discarded(client).await?,
        "session.takeovered" => provider.on_session_takeovered(client).await?,
        "session.terminated" => provider.on_session_terminated(client, &request.reason).await?,
        "message.publish" => return provider.on_message_publish(&request.message).await.map(Some),
        "message.delivered" => provider.on_message_delivered(client, &request.message).await?,
        "message.acked" => provider.on_message_acked(client, &request.message).await?,
        "message.dropped" => provider.on_message_dropped(&request.message, &request.reason).await?,
        other => return Err(HookError::UnknownHook(other.to_string())),
    }
    Ok(None)
}

/// Hook provider backed by the bridge engine
pub struct BridgeHooks {
    gate: Arc<AuthGate>,
    subscriptions: Arc<SubscriptionManager>,
    ingest: UpstreamPipeline,
    lifecycle: ConnectionLifecycle,
}

impl BridgeHooks {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        let subscriptions = Arc::new(SubscriptionManager::new(ctx.clone()));
        let gate = Arc::new(AuthGate::new(ctx.clone(), subscriptions.clone()));
        Self {
            ingest: UpstreamPipeline::new(ctx.clone()),
            lifecycle: ConnectionLifecycle::new(ctx, gate.clone()),
            gate,
            subscriptions,
        }
    }
}

#[async_trait]
impl HookProvider for BridgeHooks {
    async fn on_client_connected(&self, client: &ClientInfo) -> HookResult<()> {
        self.lifecycle
            .connected(&client.device_id(), &client.connection_info())
            .await?;
        Ok(())
    }

    async fn on_client_disconnected(&self, client: &ClientInfo, reason: &str) -> HookResult<()> {
        debug!("client {} disconnected: {}", client.client_id, reason);
        self.lifecycle.disconnected(&client.device_id()).await?;
        Ok(())
    }

    async fn on_client_authenticate(&self, client: &ClientInfo) -> HookResult<ValuedResponse> {
        match self.gate.authenticate(&client.credentials()).await {
            Ok(_) => Ok(ValuedResponse::StopAndReturn(true)),
            Err(e) => {
                warn!("refusing client {}: {}", client.client_id, e);
                Ok(ValuedResponse::StopAndReturn(false))
            }
        }
    }

    async fn on_client_subscribe(
        &self,
        client: &ClientInfo,
        filters: &[TopicFilter],
    ) -> HookResult<()> {
        let device_id = client.device_id();
        let owner = self.gate.owner(&device_id).await?;
        for filter in filters {
            self.subscriptions
                .subscribe(&owner, &device_id, &filter.name)
                .await?;
        }
        Ok(())
    }

    async fn on_client_unsubscribe(
        &self,
        client: &ClientInfo,
        filters: &[TopicFilter],
    ) -> HookResult<()> {
        let device_id = client.device_id();
        for filter in filters {
            self.subscriptions.unsubscribe(&device_id, &filter.name).await?;
        }
        Ok(())
    }

    async fn on_message_publish(&self, message: &Message) -> HookResult<ValuedResponse> {
        let device_id = owner_from_topic(&message.topic).unwrap_or_else(|| message.from.clone());
        let verdict = self
            .ingest
            .ingest(&device_id, &message.topic, &message.payload, &message.from)
            .await?;
        Ok(ValuedResponse::StopAndReturn(verdict.is_accepted()))
    }
}
