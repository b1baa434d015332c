//! Bridge error taxonomy.
//!
//! Every failure of an external collaborator is converted into one of these
//! kinds before it leaves a hook or notification handler.

use std::fmt;

use crate::broker_api::PublishError;
use crate::core_api::CoreApiError;
use crate::event_stream::EventStreamError;
use crate::store::StoreError;

/// Advisory redelivery hint returned to the core platform's delivery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Handled (or intentionally ignored)
    Success,
    /// Transient failure, redelivery may succeed
    Retry,
    /// Permanent failure, redelivery will not help
    Drop,
}

impl DispatchStatus {
    /// Wire representation used by the notification endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Success => "SUCCESS",
            DispatchStatus::Retry => "RETRY",
            DispatchStatus::Drop => "DROP",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the bridge engine
#[derive(Debug)]
pub enum BridgeError {
    /// Bad or missing credential, or the core platform rejected it
    AuthFailure(String),
    /// The device has no owner on record (never authenticated)
    NotAuthenticated(String),
    /// Key-value store operation failed
    StateStore(StoreError),
    /// Subscribe target does not map to any known topic kind
    InvalidTopic(String),
    /// Core platform REST call failed
    CoreApi(CoreApiError),
    /// Event stream submission or serialization failed
    UpstreamPublish(EventStreamError),
    /// Broker publish toward a device failed
    DownstreamDispatch(PublishError),
    /// Payload did not have the expected JSON shape
    InvalidPayload(String),
}

impl BridgeError {
    /// Map an error to the advisory status reported to the core platform
    pub fn dispatch_status(&self) -> DispatchStatus {
        match self {
            BridgeError::StateStore(_) => DispatchStatus::Retry,
            _ => DispatchStatus::Drop,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::AuthFailure(msg) => write!(f, "authentication failed: {}", msg),
            BridgeError::NotAuthenticated(device) => {
                write!(f, "device '{}' is not authenticated", device)
            }
            BridgeError::StateStore(e) => write!(f, "state store error: {}", e),
            BridgeError::InvalidTopic(topic) => write!(f, "invalid topic: {}", topic),
            BridgeError::CoreApi(e) => write!(f, "core api error: {}", e),
            BridgeError::UpstreamPublish(e) => write!(f, "upstream publish failed: {}", e),
            BridgeError::DownstreamDispatch(e) => write!(f, "downstream dispatch failed: {}", e),
            BridgeError::InvalidPayload(msg) => write!(f, "invalid payload: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::StateStore(e) => Some(e),
            BridgeError::CoreApi(e) => Some(e),
            BridgeError::UpstreamPublish(e) => Some(e),
            BridgeError::DownstreamDispatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        BridgeError::StateStore(err)
    }
}

impl From<CoreApiError> for BridgeError {
    fn from(err: CoreApiError) -> Self {
        BridgeError::CoreApi(err)
    }
}

impl From<EventStreamError> for BridgeError {
    fn from(err: EventStreamError) -> Self {
        BridgeError::UpstreamPublish(err)
    }
}

impl From<PublishError> for BridgeError {
    fn from(err: PublishError) -> Self {
        BridgeError::DownstreamDispatch(err)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidPayload(err.to_string())
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
