//! Topic Classification
//!
//! Maps device topics onto the small set of property kinds the core platform
//! understands, and back. Every device topic lives under a per-device mount
//! point (`{device_id}/...`); the part after the mount point must match one of
//! the fixed templates below.
//!
//! Request/response kinds end in a single-level wildcard which, on concrete
//! topics, carries a request id:
//!
//! ```text
//! v1/devices/me/command/request/+   <->   dev1/v1/devices/me/command/request/42
//! ```

use crate::envelope::PropertyKind;

#[cfg(test)]
mod tests;

/// Leading topic segment marking an LwM2M-mounted device
pub const LWM2M_MARKER: &str = "lwm2m";

const RAW_TOPIC: &str = "v1/devices/me/raw";
const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";
const ATTRIBUTES_GATEWAY_TOPIC: &str = "v1/gateway/attributes";
const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
const TELEMETRY_GATEWAY_TOPIC: &str = "v1/gateway/telemetry";
const COMMAND_REQUEST_TOPIC: &str = "v1/devices/me/command/request/+";
const COMMAND_RESPONSE_TOPIC: &str = "v1/devices/me/command/response/+";
const ATTRIBUTES_REQUEST_TOPIC: &str = "v1/devices/me/attributes/request/+";
const ATTRIBUTES_RESPONSE_TOPIC: &str = "v1/devices/me/attributes/response/+";

/// Semantic kind of a device topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Raw,
    Attributes,
    AttributesGateway,
    Telemetry,
    TelemetryGateway,
    CommandRequest,
    CommandResponse,
    AttributesRequest,
    AttributesResponse,
}

impl TopicKind {
    /// All kinds, in classification order
    pub const ALL: [TopicKind; 9] = [
        TopicKind::Raw,
        TopicKind::Attributes,
        TopicKind::AttributesGateway,
        TopicKind::Telemetry,
        TopicKind::TelemetryGateway,
        TopicKind::CommandRequest,
        TopicKind::CommandResponse,
        TopicKind::AttributesRequest,
        TopicKind::AttributesResponse,
    ];

    /// Topic template relative to the device mount point
    pub fn template(&self) -> &'static str {
        match self {
            TopicKind::Raw => RAW_TOPIC,
            TopicKind::Attributes => ATTRIBUTES_TOPIC,
            TopicKind::AttributesGateway => ATTRIBUTES_GATEWAY_TOPIC,
            TopicKind::Telemetry => TELEMETRY_TOPIC,
            TopicKind::TelemetryGateway => TELEMETRY_GATEWAY_TOPIC,
            TopicKind::CommandRequest => COMMAND_REQUEST_TOPIC,
            TopicKind::CommandResponse => COMMAND_RESPONSE_TOPIC,
            TopicKind::AttributesRequest => ATTRIBUTES_REQUEST_TOPIC,
            TopicKind::AttributesResponse => ATTRIBUTES_RESPONSE_TOPIC,
        }
    }

    /// Whether the template ends in a request-id wildcard
    pub fn is_request_scoped(&self) -> bool {
        self.template().ends_with("/+")
    }

    /// Template with the trailing wildcard removed
    fn base(&self) -> &'static str {
        let template = self.template();
        template.strip_suffix("/+").unwrap_or(template)
    }

    /// JSON path of the value extracted from a core notification
    pub fn property_path(&self) -> Option<&'static str> {
        match self {
            TopicKind::Attributes | TopicKind::AttributesGateway | TopicKind::AttributesResponse => {
                Some("properties.attributes")
            }
            TopicKind::CommandRequest | TopicKind::CommandResponse => Some("properties.commands"),
            TopicKind::Raw => Some("properties.rawDown"),
            _ => None,
        }
    }

    /// Property kind recorded in upstream envelopes for this topic
    pub fn property_kind(&self) -> PropertyKind {
        match self {
            TopicKind::Attributes
            | TopicKind::AttributesGateway
            | TopicKind::AttributesRequest
            | TopicKind::AttributesResponse => PropertyKind::Attributes,
            TopicKind::Telemetry | TopicKind::TelemetryGateway => PropertyKind::Telemetry,
            TopicKind::CommandRequest | TopicKind::CommandResponse => PropertyKind::Commands,
            TopicKind::Raw => PropertyKind::RawData,
        }
    }

    /// Whether the bridge delivers core changes of this kind to devices
    pub fn is_subscribable(&self) -> bool {
        matches!(
            self,
            TopicKind::Raw
                | TopicKind::Attributes
                | TopicKind::AttributesGateway
                | TopicKind::CommandRequest
                | TopicKind::AttributesResponse
        )
    }

    /// Whether a subscription to this kind needs a core-side subscription entity
    pub fn needs_core_subscription(&self) -> bool {
        self.is_subscribable() && *self != TopicKind::AttributesResponse
    }

    /// Render the template for a concrete request id
    pub fn fill(&self, request_id: &str) -> String {
        if self.is_request_scoped() {
            format!("{}/{}", self.base(), request_id)
        } else {
            self.template().to_string()
        }
    }
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.template())
    }
}

/// Classify a topic relative to the device mount point
///
/// Returns `None` for topics that match no template.
pub fn classify(topic: &str) -> Option<TopicKind> {
    TopicKind::ALL.into_iter().find(|kind| matches_kind(*kind, topic))
}

/// Inverse of [`classify`]
pub fn template_for(kind: TopicKind) -> &'static str {
    kind.template()
}

fn matches_kind(kind: TopicKind, topic: &str) -> bool {
    if !kind.is_request_scoped() {
        return topic == kind.template();
    }

    let base = kind.base();
    if topic == base {
        return true;
    }
    match topic.strip_prefix(base).and_then(|rest| rest.strip_prefix('/')) {
        Some(id) => !id.is_empty() && !id.contains('/') && id != "#",
        None => false,
    }
}

/// Extract the request id from a concrete request/response topic
///
/// The topic may be relative or carry the device mount point.
pub fn request_id(kind: TopicKind, topic: &str) -> Option<&str> {
    if !kind.is_request_scoped() {
        return None;
    }
    let base = kind.base();
    let start = topic.find(base)?;
    let id = topic[start + base.len()..].strip_prefix('/')?;
    if id.is_empty() || id == "+" || id.contains('/') {
        None
    } else {
        Some(id)
    }
}

/// Split a mounted topic into `(device_id, relative_topic)`
///
/// The leading segment is the device identity, except under the LwM2M mount
/// point (`lwm2m/{endpoint}@{secret}/...`) where the identity is taken from the
/// next segment and reduced to the part before `@`.
pub fn split_device_topic(topic: &str) -> Option<(String, &str)> {
    let (first, rest) = topic.split_once('/')?;
    if first == LWM2M_MARKER {
        let (inner, rest) = split_device_topic(rest)?;
        let identity = lwm2m_identity(&inner);
        if identity.is_empty() {
            return None;
        }
        return Some((identity.to_string(), rest));
    }
    if first.is_empty() {
        return None;
    }
    Some((first.to_string(), rest))
}

/// Device identity from a fully mounted topic
pub fn owner_from_topic(topic: &str) -> Option<String> {
    split_device_topic(topic).map(|(device, _)| device)
}

/// Classify a topic that may or may not carry the device mount point
pub fn classify_device_topic(topic: &str) -> Option<TopicKind> {
    classify(topic).or_else(|| {
        split_device_topic(topic).and_then(|(_, relative)| classify(relative))
    })
}

/// Device-facing topic for a kind and optional request id
pub fn device_topic(device_id: &str, kind: TopicKind, request_id: Option<&str>) -> String {
    match request_id {
        Some(id) => format!("{}/{}", device_id, kind.fill(id)),
        None => format!("{}/{}", device_id, kind.template()),
    }
}

/// Identity half of an LwM2M `identity@secret` client id
pub fn lwm2m_identity(client_id: &str) -> &str {
    client_id.split('@').next().unwrap_or_default()
}
