//! Event stream producer
//!
//! Upstream envelopes are submitted without waiting for delivery. Each
//! submission later yields a [`DeliveryReport`] on a broadcast channel, which
//! a supervised monitor task drains for logging and metrics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EventStreamConfig;
use crate::envelope::{CloudEvent, UpstreamEnvelope};
use crate::metrics::Metrics;

/// Pause before re-subscribing to a closed report channel
const MONITOR_RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

/// Errors raised while handing an event to the stream
#[derive(Debug)]
pub enum EventStreamError {
    /// Event could not be encoded
    Serialize(String),
    /// Producer is shut down
    Closed,
}

impl fmt::Display for EventStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStreamError::Serialize(e) => write!(f, "failed to encode event: {}", e),
            EventStreamError::Closed => write!(f, "event stream is closed"),
        }
    }
}

impl std::error::Error for EventStreamError {}

impl From<serde_json::Error> for EventStreamError {
    fn from(err: serde_json::Error) -> Self {
        EventStreamError::Serialize(err.to_string())
    }
}

/// Outcome of one submitted event
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub event_id: String,
    pub partition_key: String,
    /// `None` when delivered
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Asynchronous, partitioned event producer
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Hand an event over for delivery; returns before delivery completes
    async fn submit(&self, partition_key: &str, event: CloudEvent) -> Result<(), EventStreamError>;

    /// Subscribe to delivery outcomes
    fn reports(&self) -> broadcast::Receiver<DeliveryReport>;
}

/// [`EventStream`] publishing through the dapr pub/sub HTTP API
pub struct DaprEventStream {
    client: Client,
    publish_url: String,
    reports: broadcast::Sender<DeliveryReport>,
}

impl DaprEventStream {
    pub fn new(config: &EventStreamConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let (reports, _) = broadcast::channel(config.report_capacity);
        info!(
            "Created event stream publishing to {}/{}",
            config.pubsub_name, config.topic
        );
        Ok(Self {
            client,
            publish_url: format!(
                "{}/v1.0/publish/{}/{}",
                config.base_url.trim_end_matches('/'),
                config.pubsub_name,
                config.topic
            ),
            reports,
        })
    }
}

#[async_trait]
impl EventStream for DaprEventStream {
    async fn submit(&self, partition_key: &str, event: CloudEvent) -> Result<(), EventStreamError> {
        let body = serde_json::to_vec(&event)?;
        let request = self
            .client
            .post(&self.publish_url)
            .query(&[("metadata.partitionKey", partition_key)])
            .header("content-type", "application/cloudevents+json")
            .body(body);

        let reports = self.reports.clone();
        let event_id = event.id;
        let partition_key = partition_key.to_string();

        tokio::spawn(async move {
            let error = match request.send().await {
                Ok(response) if response.status().is_success() => None,
                Ok(response) => Some(format!("publish returned {}", response.status())),
                Err(e) => Some(e.to_string()),
            };
            // No receivers just means nobody is watching outcomes
            let _ = reports.send(DeliveryReport {
                event_id,
                partition_key,
                error,
            });
        });

        Ok(())
    }

    fn reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }
}

/// Wraps envelopes as cloud events and submits them keyed by device
#[derive(Clone)]
pub struct EnvelopeSink {
    stream: Arc<dyn EventStream>,
    pubsub_name: String,
    topic: String,
}

impl EnvelopeSink {
    pub fn new(stream: Arc<dyn EventStream>, pubsub_name: &str, topic: &str) -> Self {
        Self {
            stream,
            pubsub_name: pubsub_name.to_string(),
            topic: topic.to_string(),
        }
    }

    /// Submit an envelope; the device id is the partition key
    pub async fn emit(&self, envelope: UpstreamEnvelope) -> Result<(), EventStreamError> {
        let partition_key = envelope.id.clone();
        let event = CloudEvent::wrap(envelope, &self.pubsub_name, &self.topic);
        self.stream.submit(&partition_key, event).await
    }
}

/// Spawn the delivery monitor
///
/// Logs and counts every report. Lagging skips ahead; a closed channel is
/// re-subscribed after a short pause. The task only ends on shutdown.
pub fn spawn_delivery_monitor(
    stream: Arc<dyn EventStream>,
    metrics: Option<Arc<Metrics>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reports = stream.reports();
        loop {
            tokio::select! {
                received = reports.recv() => match received {
                    Ok(report) => observe(&report, metrics.as_deref()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Delivery monitor lagged, {} reports skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Delivery report channel closed, resubscribing");
                        tokio::select! {
                            _ = tokio::time::sleep(MONITOR_RESUBSCRIBE_BACKOFF) => {}
                            _ = shutdown.changed() => break,
                        }
                        reports = stream.reports();
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Delivery monitor stopped");
    })
}

fn observe(report: &DeliveryReport, metrics: Option<&Metrics>) {
    match &report.error {
        None => debug!(
            "event {} delivered (partition {})",
            report.event_id, report.partition_key
        ),
        Some(e) => error!(
            "event {} for {} failed: {}",
            report.event_id, report.partition_key, e
        ),
    }
    if let Some(metrics) = metrics {
        metrics.event_delivery(report.is_delivered());
    }
}
