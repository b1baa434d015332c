//! Subscription Manager
//!
//! One core-side subscription entity serves every topic of a device. Its id is
//! derived from the device id, so creating it twice addresses the same entity.
//!
//! Store layout per device:
//!
//! ```text
//! {device}_sub                 -> subscription id   (forward lookup)
//! {subscription id}            -> device id         (reverse lookup)
//! {device}/{topic template}    -> subscribed topic  (one marker per topic kind)
//! {device}                     -> ["id", ...]       (legacy id list, read only)
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::context::BridgeContext;
use crate::core_api::{SubscriptionMode, SubscriptionRequest};
use crate::error::{BridgeError, Result};
use crate::store::{self, keys};
use crate::topic::{classify_device_topic, TopicKind};


/// Item selector covering every property of a device
pub const ALL_ITEMS: &str = "*";

/// Deterministic subscription id of a device
pub fn subscription_id(device_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(ALL_ITEMS.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Delivery mode requested for the entity created by a topic kind
pub fn subscription_mode(kind: TopicKind) -> SubscriptionMode {
    match kind {
        TopicKind::CommandRequest => SubscriptionMode::Realtime,
        _ => SubscriptionMode::OnChange,
    }
}

/// Ordered list of subscription ids kept by the legacy per-device scheme
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionIds(Vec<String>);

impl SubscriptionIds {
    /// Append an id, keeping the list free of duplicates
    pub fn append(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Creates and removes device subscriptions
pub struct SubscriptionManager {
    ctx: Arc<BridgeContext>,
}

impl SubscriptionManager {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Register interest of a device in a topic
    ///
    /// The core entity is created only when the device has none yet.
    pub async fn subscribe(&self, owner: &str, device_id: &str, topic: &str) -> Result<()> {
        let kind = classify_device_topic(topic)
            .ok_or_else(|| BridgeError::InvalidTopic(topic.to_string()))?;
        let store = &self.ctx.store;

        if kind.needs_core_subscription() && !store.exists(&keys::subscription(device_id)).await? {
            let id = subscription_id(device_id);
            let body = self.ctx.settings.subscription_object(
                &id,
                device_id,
                ALL_ITEMS,
                subscription_mode(kind),
            );
            self.ctx
                .core
                .create_subscription(&SubscriptionRequest {
                    id: id.clone(),
                    owner: owner.to_string(),
                    body,
                })
                .await?;

            store
                .save(&keys::subscription_device(&id), device_id.as_bytes())
                .await?;
            store
                .save(&keys::subscription(device_id), id.as_bytes())
                .await?;

            if let Some(metrics) = self.ctx.metrics() {
                metrics.subscription_created();
            }
            info!("created subscription {} for device {}", id, device_id);
        }

        store
            .save(&keys::topic_marker(device_id, kind), topic.as_bytes())
            .await?;
        debug!("device {} subscribed to {} ({:?})", device_id, topic, kind);
        Ok(())
    }

    /// Drop interest of a device in a topic
    ///
    /// Removing the last topic also removes the subscription id mappings. The
    /// core entity itself is left for [`cleanup_device`](Self::cleanup_device).
    pub async fn unsubscribe(&self, device_id: &str, topic: &str) -> Result<()> {
        let Some(kind) = classify_device_topic(topic) else {
            debug!("device {} unsubscribed from unknown topic {}", device_id, topic);
            return Ok(());
        };

        self.ctx
            .store
            .delete(&keys::topic_marker(device_id, kind))
            .await?;

        if !self.has_markers(device_id).await? {
            if let Some(id) = self.remove_mappings(device_id).await? {
                info!("device {} has no topics left, released subscription {}", device_id, id);
            }
        }
        Ok(())
    }

    /// Whether a device still has live interest in the given kind
    pub async fn is_subscribed(&self, device_id: &str, kind: TopicKind) -> Result<bool> {
        Ok(self
            .ctx
            .store
            .exists(&keys::topic_marker(device_id, kind))
            .await?)
    }

    /// Device owning a subscription id
    pub async fn device_for(&self, subscription_id: &str) -> Result<Option<String>> {
        Ok(self
            .ctx
            .store
            .get_string(&keys::subscription_device(subscription_id))
            .await?)
    }

    /// Remove every subscription a device holds
    ///
    /// The core entity is deleted by its derived id, so an entity whose
    /// mappings were dropped by the last unsubscribe is still removed. A
    /// legacy id list is cleaned up as well. Missing keys count as already
    /// clean.
    pub async fn cleanup_device(&self, owner: &str, device_id: &str) -> Result<()> {
        let store = &self.ctx.store;

        let mut ids = vec![subscription_id(device_id)];
        if let Some(stored) = store.get_string(&keys::subscription(device_id)).await? {
            if !ids.contains(&stored) {
                ids.push(stored);
            }
        }

        for id in &ids {
            if let Err(e) = self.ctx.core.delete_subscription(id, owner).await {
                error!("failed to delete subscription {} of {}: {}", id, device_id, e);
            }
        }
        if let Some(id) = self.remove_mappings(device_id).await? {
            info!("removed subscription {} of device {}", id, device_id);
        }
        self.remove_markers(device_id).await?;

        self.cleanup_legacy(device_id).await
    }

    async fn cleanup_legacy(&self, device_id: &str) -> Result<()> {
        let store = &self.ctx.store;
        let list_key = keys::legacy_subscriptions(device_id);

        let ids = match store::get_json::<SubscriptionIds>(store.as_ref(), &list_key).await {
            Ok(Some(ids)) => ids,
            Ok(None) => return Ok(()),
            Err(store::StoreError::Deserialize(e)) => {
                warn!("discarding unreadable subscription list of {}: {}", device_id, e);
                SubscriptionIds::default()
            }
            Err(e) => return Err(e.into()),
        };

        for id in ids.iter() {
            if let Some(topic) = store.get_string(id).await? {
                store.delete(&topic).await?;
            }
            store.delete(id).await?;
        }
        store.delete(&list_key).await?;

        if !ids.is_empty() {
            info!(
                "removed {} legacy subscriptions of device {}",
                ids.len(),
                device_id
            );
        }
        Ok(())
    }

    async fn has_markers(&self, device_id: &str) -> Result<bool> {
        for kind in TopicKind::ALL {
            if self.is_subscribed(device_id, kind).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove_markers(&self, device_id: &str) -> Result<()> {
        for kind in TopicKind::ALL {
            self.ctx
                .store
                .delete(&keys::topic_marker(device_id, kind))
                .await?;
        }
        Ok(())
    }

    /// Delete forward and reverse mappings, returning the released id
    async fn remove_mappings(&self, device_id: &str) -> Result<Option<String>> {
        let store = &self.ctx.store;
        let forward = keys::subscription(device_id);

        let Some(id) = store.get_string(&forward).await? else {
            return Ok(None);
        };
        store.delete(&keys::subscription_device(&id)).await?;
        store.delete(&forward).await?;

        if let Some(metrics) = self.ctx.metrics() {
            metrics.subscription_removed();
        }
        Ok(Some(id))
    }
}
