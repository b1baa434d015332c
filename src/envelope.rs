//! Envelope data model
//!
//! Canonical records exchanged with the event stream and the state store.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Entity type carried by every device envelope
pub const ENTITY_TYPE_DEVICE: &str = "device";

/// Cloud-event type used for pub/sub submissions
pub const CLOUD_EVENT_TYPE: &str = "com.dapr.event.sent";

/// Cloud-event spec version
pub const CLOUD_EVENT_SPEC_VERSION: &str = "1.0";

/// Device property stream an envelope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyKind {
    RawData,
    Attributes,
    Telemetry,
    Commands,
    ConnectInfo,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::RawData => "rawData",
            PropertyKind::Attributes => "attributes",
            PropertyKind::Telemetry => "telemetry",
            PropertyKind::Commands => "commands",
            PropertyKind::ConnectInfo => "connectInfo",
        }
    }
}

/// Direction marker of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Upstream,
    Downstream,
    Connecting,
}

impl Mark {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mark::Upstream => "upstream",
            Mark::Downstream => "downstream",
            Mark::Connecting => "connecting",
        }
    }
}

/// Property update carried inside an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub id: String,
    /// Wall-clock epoch milliseconds
    pub ts: u64,
    pub values: Value,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    pub mark: Mark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeData {
    #[serde(rename = "rawData")]
    pub raw_data: RawData,
}

/// Unit handed to the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEnvelope {
    pub id: String,
    pub owner: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub source: String,
    pub data: EnvelopeData,
}

impl UpstreamEnvelope {
    /// Build an envelope stamped with the current time
    pub fn new(
        device_id: &str,
        owner: &str,
        source: &str,
        kind: PropertyKind,
        mark: Mark,
        path: &str,
        values: Value,
    ) -> Self {
        Self {
            id: device_id.to_string(),
            owner: owner.to_string(),
            entity_type: ENTITY_TYPE_DEVICE.to_string(),
            source: source.to_string(),
            data: EnvelopeData {
                raw_data: RawData {
                    id: device_id.to_string(),
                    ts: now_millis(),
                    values,
                    path: path.to_string(),
                    kind,
                    mark,
                },
            },
        }
    }

    pub fn raw_data(&self) -> &RawData {
        &self.data.raw_data
    }
}

/// Cloud-event shaped wrapper submitted to the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub traceid: String,
    pub id: String,
    pub topic: String,
    pub pubsubname: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub specversion: String,
    pub data: UpstreamEnvelope,
}

impl CloudEvent {
    /// Wrap an envelope with fresh trace and event ids
    pub fn wrap(envelope: UpstreamEnvelope, pubsub_name: &str, topic: &str) -> Self {
        Self {
            traceid: uuid::Uuid::new_v4().to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            pubsubname: pubsub_name.to_string(),
            source: envelope.source.clone(),
            event_type: CLOUD_EVENT_TYPE.to_string(),
            specversion: CLOUD_EVENT_SPEC_VERSION.to_string(),
            data: envelope,
        }
    }
}

/// Per-device connection metadata, persisted while a device is online
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "_clientid")]
    pub client_id: String,
    #[serde(rename = "_username")]
    pub user_name: String,
    #[serde(rename = "_peerhost")]
    pub peer_host: String,
    #[serde(rename = "_protocol")]
    pub protocol: String,
    #[serde(rename = "_socketport")]
    pub socket_port: String,
    #[serde(rename = "_online")]
    pub online: bool,
    #[serde(rename = "_owner")]
    pub owner: String,
    #[serde(rename = "_timestamp")]
    pub timestamp_millis: u64,
}

impl ConnectionRecord {
    /// Offline record: every connection field cleared
    pub fn offline(owner: &str) -> Self {
        Self {
            online: false,
            owner: owner.to_string(),
            timestamp_millis: now_millis(),
            ..Default::default()
        }
    }
}

/// Decode a device payload
///
/// JSON stays structured and other UTF-8 text becomes a string. Anything else
/// is carried as `{"base64": "..."}` so no byte is lost.
pub fn decode_payload(payload: &[u8]) -> Value {
    if let Ok(value) = serde_json::from_slice(payload) {
        return value;
    }
    match std::str::from_utf8(payload) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({ BINARY_PAYLOAD_KEY: STANDARD.encode(payload) }),
    }
}

/// Key wrapping a payload that is not valid UTF-8
pub const BINARY_PAYLOAD_KEY: &str = "base64";

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
