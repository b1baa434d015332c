//! Downstream Dispatch Pipeline
//!
//! Delivers core-side property changes to devices. A notification carries the
//! device id and a `properties` object; the property present decides the
//! device topic:
//!
//! ```text
//! properties.commands.*.input   -> {device}/v1/devices/me/command/request/{id}
//! properties.commands.*.output  -> ignored (device-originated)
//! properties.attributes         -> {device}/v1/devices/me/attributes
//! properties.rawDown            -> {device}/v1/devices/me/raw
//! ```
//!
//! Nothing is delivered unless the device currently holds a subscription for
//! the derived kind.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::broker_api::PublishRequest;
use crate::context::BridgeContext;
use crate::envelope::{Mark, UpstreamEnvelope};
use crate::error::{BridgeError, DispatchStatus, Result};
use crate::store::keys;
use crate::subscription::SubscriptionManager;
use crate::topic::{device_topic, TopicKind};


/// Change notification received from the core platform
#[derive(Debug, Clone, PartialEq)]
pub struct CoreNotification {
    /// Pub/sub topic the notification arrived on
    pub topic: String,
    pub body: Value,
}

impl CoreNotification {
    pub fn new(topic: impl Into<String>, body: Value) -> Self {
        Self {
            topic: topic.into(),
            body,
        }
    }

    /// Decode a raw notification body
    pub fn from_slice(topic: impl Into<String>, body: &[u8]) -> Result<Self> {
        Ok(Self::new(topic, serde_json::from_slice(body)?))
    }

    /// Entity change carried by the notification
    ///
    /// Accepts the change itself or a cloud event wrapping it in `data`.
    fn change(&self) -> Result<EntityChange> {
        let body = match self.body.get("data") {
            Some(data) if data.is_object() && self.body.get("properties").is_none() => data,
            _ => &self.body,
        };
        Ok(EntityChange::deserialize(body)?)
    }
}

#[derive(Debug, Deserialize)]
struct EntityChange {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "subscriptionId")]
    subscription_id: Option<String>,
    #[serde(default)]
    properties: Value,
}

/// Topic kind a change maps to, if any
pub fn derive_kind(properties: &Value) -> Option<TopicKind> {
    if let Some(commands) = properties.get("commands") {
        if find_key(commands, "input").is_some() {
            return Some(TopicKind::CommandRequest);
        }
        if find_key(commands, "output").is_some() {
            return Some(TopicKind::CommandResponse);
        }
    }
    if properties.get("attributes").is_some() {
        return Some(TopicKind::Attributes);
    }
    if properties.get("rawDown").is_some() {
        return Some(TopicKind::Raw);
    }
    None
}

/// Value at a dotted path such as `properties.attributes`
pub fn extract<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |value, segment| value.get(segment))
}

/// First object (depth first) that carries `key`
fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a serde_json::Map<String, Value>> {
    let object = value.as_object()?;
    if object.contains_key(key) {
        return Some(object);
    }
    object.values().find_map(|v| find_key(v, key))
}

/// Request id of a command, generated when the core did not supply one
fn command_request_id(commands: &Value) -> String {
    find_key(commands, "input")
        .and_then(|command| command.get("id"))
        .and_then(|id| match id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Pushes core changes to devices
pub struct DownstreamPipeline {
    ctx: Arc<BridgeContext>,
    subscriptions: Arc<SubscriptionManager>,
}

impl DownstreamPipeline {
    pub fn new(ctx: Arc<BridgeContext>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self { ctx, subscriptions }
    }

    /// Handle one notification
    ///
    /// Ignored notifications report `Success`; failures carry the error,
    /// whose [`BridgeError::dispatch_status`] is the advisory status.
    pub async fn dispatch(&self, notification: &CoreNotification) -> Result<DispatchStatus> {
        let result = self.try_dispatch(notification).await;
        let status = status_of(&result);

        if let Err(e) = &result {
            warn!(
                "dispatch of notification on {} failed ({}): {}",
                notification.topic, status, e
            );
        }
        if let Some(metrics) = self.ctx.metrics() {
            metrics.dispatch(status);
        }
        result
    }

    async fn try_dispatch(&self, notification: &CoreNotification) -> Result<DispatchStatus> {
        let change = notification.change()?;

        let Some(kind) = derive_kind(&change.properties) else {
            debug!("notification on {} has no device property", notification.topic);
            return Ok(DispatchStatus::Success);
        };
        if !kind.is_subscribable() {
            debug!("ignoring {:?} change", kind);
            return Ok(DispatchStatus::Success);
        }

        let device_id = self.resolve_device(&change).await?;
        if !self.subscriptions.is_subscribed(&device_id, kind).await? {
            debug!("device {} is not subscribed to {:?}", device_id, kind);
            return Ok(DispatchStatus::Success);
        }

        let path = kind
            .property_path()
            .ok_or_else(|| BridgeError::InvalidPayload(format!("{:?} has no property path", kind)))?;
        let root = serde_json::json!({ "properties": change.properties });
        let value = extract(&root, path)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidPayload(format!("missing {}", path)))?;

        let topic = match kind {
            TopicKind::CommandRequest => {
                device_topic(&device_id, kind, Some(&command_request_id(&value)))
            }
            _ => device_topic(&device_id, kind, None),
        };

        let settings = &self.ctx.settings;
        self.ctx
            .publisher
            .publish(PublishRequest::json(
                topic.clone(),
                &value,
                settings.qos,
                &settings.loopback_client_id,
            ))
            .await?;
        debug!("delivered {:?} change to {}", kind, topic);

        self.mirror(&device_id, kind, &topic, value).await;
        Ok(DispatchStatus::Success)
    }

    async fn resolve_device(&self, change: &EntityChange) -> Result<String> {
        if let Some(subscription_id) = &change.subscription_id {
            if let Some(device) = self.subscriptions.device_for(subscription_id).await? {
                return Ok(device);
            }
        }
        change
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::InvalidPayload("notification carries no device id".to_string()))
    }

    /// Record the delivered change on the event stream
    async fn mirror(&self, device_id: &str, kind: TopicKind, topic: &str, value: Value) {
        let owner = match self.ctx.store.get_string(&keys::owner(device_id)).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                debug!("no owner for {}, skipping downstream mirror", device_id);
                return;
            }
            Err(e) => {
                warn!("owner lookup for {} failed: {}", device_id, e);
                return;
            }
        };

        let envelope = UpstreamEnvelope::new(
            device_id,
            &owner,
            &self.ctx.settings.source,
            kind.property_kind(),
            Mark::Downstream,
            topic,
            value,
        );
        if let Err(e) = self.ctx.events.emit(envelope).await {
            warn!("failed to mirror downstream change of {}: {}", device_id, e);
        }
    }
}

/// Advisory status of a dispatch result
pub fn status_of(result: &Result<DispatchStatus>) -> DispatchStatus {
    match result {
        Ok(status) => *status,
        Err(e) => e.dispatch_status(),
    }
}
