//! State store for per-device bridge state.
//!
//! The store is the single source of truth for everything the bridge knows
//! about a device; bridge replicas keep nothing authoritative in memory.
//!
//! Backends:
//! - `MemoryStore` - process-local map (tests, single-process development)
//! - `FjallStore` - local LSM-tree storage (single replica deployments)
//! - `DaprStateStore` - HTTP state API of a dapr sidecar (shared by replicas)
//!
//! Entries are raw bytes. Multi-key updates are written one key at a time and
//! are never atomic; readers treat a missing key as "already clean".

mod dapr;
mod error;
mod fjall;
mod memory;

pub use dapr::DaprStateStore;
pub use error::{Result, StoreError};
pub use fjall::FjallStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::topic::TopicKind;

/// Key-value store trait
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Save a value, overwriting any previous value
    async fn save(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key (deleting a missing key is not an error)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get a value as UTF-8 text
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Deserialize(e.to_string())),
            None => Ok(None),
        }
    }

    /// Check whether a key is present
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Make pending writes durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialize a value to JSON and save it
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.save(key, &bytes).await
}

/// Load and deserialize a JSON value
pub async fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Key layout of per-device state
pub mod keys {
    use super::TopicKind;

    /// Owning tenant of an authenticated device
    pub fn owner(device_id: &str) -> String {
        format!("{}_de", device_id)
    }

    /// Connection record of an online device
    pub fn connection(device_id: &str) -> String {
        format!("{}_ci", device_id)
    }

    /// Time a device session was closed, cleared by the next authentication
    pub fn session_closed(device_id: &str) -> String {
        format!("{}_dc", device_id)
    }

    /// Forward lookup: device -> active subscription id
    pub fn subscription(device_id: &str) -> String {
        format!("{}_sub", device_id)
    }

    /// Reverse lookup: subscription id -> device
    pub fn subscription_device(subscription_id: &str) -> String {
        subscription_id.to_string()
    }

    /// Legacy per-device list of subscription ids
    pub fn legacy_subscriptions(device_id: &str) -> String {
        device_id.to_string()
    }

    /// Marker recording live interest of a device in a topic kind
    pub fn topic_marker(device_id: &str, kind: TopicKind) -> String {
        format!("{}/{}", device_id, kind.template())
    }
}
