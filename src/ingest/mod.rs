//! Upstream Ingest Pipeline
//!
//! Turns accepted device publishes into upstream envelopes on the event
//! stream. Messages the bridge injected itself (loopback sender id) are
//! acknowledged and dropped so downstream traffic is never re-ingested.
//!
//! Publishes on the attribute request topic are answered directly from the
//! core platform instead of being forwarded.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::broker_api::PublishRequest;
use crate::context::BridgeContext;
use crate::envelope::{decode_payload, Mark, PropertyKind, UpstreamEnvelope};
use crate::error::{BridgeError, Result};
use crate::store::keys;
use crate::topic::{classify_device_topic, device_topic, request_id, TopicKind};

#[cfg(test)]
mod tests;

/// Tenant label for loopback traffic whose owner cannot be resolved
pub const UNKNOWN_TENANT: &str = "unknown";

/// Outcome reported back to the broker for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestVerdict {
    Accepted,
    Rejected,
}

impl IngestVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestVerdict::Accepted)
    }
}

/// Body of an attribute request publish
#[derive(Debug, Default, Deserialize)]
struct AttributesQuery {
    #[serde(default)]
    keys: String,
}

impl AttributesQuery {
    fn keys(&self) -> Vec<String> {
        self.keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Forwards device publishes to the event stream
pub struct UpstreamPipeline {
    ctx: Arc<BridgeContext>,
}

impl UpstreamPipeline {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Handle one publish
    ///
    /// Unauthenticated devices are rejected. Once the envelope is handed to
    /// the event stream the publish is accepted, even if submission fails.
    pub async fn ingest(
        &self,
        device_id: &str,
        topic: &str,
        payload: &[u8],
        sender_id: &str,
    ) -> Result<IngestVerdict> {
        if sender_id == self.ctx.settings.loopback_client_id {
            debug!("skipping loopback publish on {}", topic);
            if let Some(metrics) = self.ctx.metrics() {
                let owner = match self.ctx.store.get_string(&keys::owner(device_id)).await {
                    Ok(Some(owner)) => owner,
                    Ok(None) => UNKNOWN_TENANT.to_string(),
                    Err(e) => {
                        debug!("owner of {} unavailable for loopback count: {}", device_id, e);
                        UNKNOWN_TENANT.to_string()
                    }
                };
                metrics.message(&owner, Mark::Downstream);
            }
            return Ok(IngestVerdict::Accepted);
        }

        let started = Instant::now();
        let owner = match self.ctx.store.get_string(&keys::owner(device_id)).await? {
            Some(owner) => owner,
            None => {
                warn!("rejecting publish from unauthenticated device {}", device_id);
                return Ok(IngestVerdict::Rejected);
            }
        };

        let kind = classify_device_topic(topic);
        if kind == Some(TopicKind::AttributesRequest) {
            self.answer_attributes_request(&owner, device_id, topic, payload)
                .await;
            return Ok(IngestVerdict::Accepted);
        }

        let property_kind = kind
            .map(|k| k.property_kind())
            .unwrap_or(PropertyKind::RawData);
        let envelope = UpstreamEnvelope::new(
            device_id,
            &owner,
            &self.ctx.settings.source,
            property_kind,
            Mark::Upstream,
            topic,
            decode_payload(payload),
        );

        match self.ctx.events.emit(envelope).await {
            Ok(()) => debug!(
                "forwarded {} from {} as {}",
                topic,
                device_id,
                property_kind.as_str()
            ),
            Err(e) => warn!("failed to submit publish from {}: {}", device_id, e),
        }

        if let Some(metrics) = self.ctx.metrics() {
            metrics.message(&owner, Mark::Upstream);
            metrics
                .ingest_latency
                .observe(started.elapsed().as_secs_f64());
        }
        Ok(IngestVerdict::Accepted)
    }

    async fn answer_attributes_request(
        &self,
        owner: &str,
        device_id: &str,
        topic: &str,
        payload: &[u8],
    ) {
        if let Err(e) = self
            .try_answer_attributes_request(owner, device_id, topic, payload)
            .await
        {
            warn!("attribute request from {} failed: {}", device_id, e);
        }
    }

    async fn try_answer_attributes_request(
        &self,
        owner: &str,
        device_id: &str,
        topic: &str,
        payload: &[u8],
    ) -> Result<()> {
        let id = request_id(TopicKind::AttributesRequest, topic)
            .ok_or_else(|| BridgeError::InvalidTopic(topic.to_string()))?;
        let query: AttributesQuery = if payload.is_empty() {
            AttributesQuery::default()
        } else {
            serde_json::from_slice(payload)?
        };

        let attributes = self
            .ctx
            .core
            .entity_attributes(owner, device_id, &query.keys())
            .await?;

        let settings = &self.ctx.settings;
        let request = PublishRequest::json(
            device_topic(device_id, TopicKind::AttributesResponse, Some(id)),
            &attributes,
            settings.qos,
            &settings.loopback_client_id,
        );
        self.ctx.publisher.publish(request).await?;

        debug!("answered attribute request {} of {}", id, device_id);
        Ok(())
    }
}
