//! State store error types.

use std::fmt;

/// Errors raised by a [`KeyValueStore`](super::KeyValueStore) backend
#[derive(Debug)]
pub enum StoreError {
    /// Embedded fjall database failure
    Embedded(fjall::Error),
    /// Sidecar could not be reached
    Unreachable(reqwest::Error),
    /// Sidecar answered a state call with an unexpected status
    Status {
        op: &'static str,
        key: String,
        status: u16,
    },
    /// Value could not be encoded
    Serialize(String),
    /// Stored value could not be decoded
    Deserialize(String),
    /// Backend failing for any other reason
    Storage(String),
}

impl StoreError {
    pub(crate) fn status(op: &'static str, key: &str, status: reqwest::StatusCode) -> Self {
        Self::Status {
            op,
            key: key.to_string(),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded(e) => write!(f, "embedded store error: {}", e),
            Self::Unreachable(e) => write!(f, "state sidecar unreachable: {}", e),
            Self::Status { op, key, status } => {
                write!(f, "state {} of '{}' returned {}", op, key, status)
            }
            Self::Serialize(e) => write!(f, "serialization error: {}", e),
            Self::Deserialize(e) => write!(f, "deserialization error: {}", e),
            Self::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Embedded(e) => Some(e),
            Self::Unreachable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<fjall::Error> for StoreError {
    fn from(err: fjall::Error) -> Self {
        Self::Embedded(err)
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unreachable(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialize(err.to_string())
        } else {
            Self::Serialize(err.to_string())
        }
    }
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
