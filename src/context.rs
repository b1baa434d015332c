//! Bridge context
//!
//! Collaborator handles and settings shared by every engine component. The
//! context holds no per-device state; everything about a device is read from
//! the state store on each call.

use std::sync::Arc;

use crate::broker_api::BrokerPublisher;
use crate::config::Config;
use crate::core_api::{CoreApi, SubscriptionMode, SubscriptionObject};
use crate::event_stream::{EnvelopeSink, EventStream};
use crate::metrics::Metrics;
use crate::store::KeyValueStore;

/// Static settings derived from configuration
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Client id stamped on everything the bridge publishes into the broker
    pub loopback_client_id: String,
    /// Source name carried by envelopes
    pub source: String,
    /// QoS of downstream publishes
    pub qos: u8,
    /// Pub/sub component core notifications arrive on
    pub subscription_pubsub: String,
    /// Topic core notifications arrive on
    pub subscription_topic: String,
    /// Source recorded on subscription entities
    pub subscription_source: String,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            loopback_client_id: config.bridge.loopback_client_id.clone(),
            source: config.bridge.source.clone(),
            qos: config.broker.qos,
            subscription_pubsub: config.core.subscription_pubsub.clone(),
            subscription_topic: config.core.subscription_topic.clone(),
            subscription_source: config.core.subscription_source.clone(),
        }
    }

    /// Body of a subscription entity selecting `item` of a device
    pub fn subscription_object(
        &self,
        subscription_id: &str,
        device_id: &str,
        item: &str,
        mode: SubscriptionMode,
    ) -> SubscriptionObject {
        SubscriptionObject {
            pubsub_name: self.subscription_pubsub.clone(),
            topic: self.subscription_topic.clone(),
            mode,
            filter: format!("insert into {} select {}.{}", subscription_id, device_id, item),
            source: self.subscription_source.clone(),
            target: self.source.clone(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared collaborators
#[derive(Clone)]
pub struct BridgeContext {
    pub store: Arc<dyn KeyValueStore>,
    pub core: Arc<dyn CoreApi>,
    pub publisher: Arc<dyn BrokerPublisher>,
    pub events: EnvelopeSink,
    pub metrics: Option<Arc<Metrics>>,
    pub settings: BridgeSettings,
}

impl BridgeContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        core: Arc<dyn CoreApi>,
        publisher: Arc<dyn BrokerPublisher>,
        stream: Arc<dyn EventStream>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            core,
            publisher,
            events: EnvelopeSink::new(
                stream,
                &config.event_stream.pubsub_name,
                &config.event_stream.topic,
            ),
            metrics: None,
            settings: BridgeSettings::from_config(config),
        }
    }

    /// Attach a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }
}
