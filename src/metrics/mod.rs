//! Prometheus metrics for the iothub bridge
//!
//! Exposes metrics at /metrics endpoint for monitoring and observability.
//! All collectors are safe to update concurrently from any task.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::envelope::Mark;
use crate::error::DispatchStatus;

mod server;

pub(crate) use server::{serve, text_response, ServeError};
pub use server::MetricsServer;

/// All bridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Traffic metrics
    pub messages_total: IntCounterVec,
    pub ingest_latency: Histogram,

    // Device metrics
    pub devices_online: IntGaugeVec,
    pub auth_total: IntCounterVec,

    // Subscription metrics
    pub subscriptions_created_total: IntCounter,
    pub subscriptions_removed_total: IntCounter,

    // Delivery metrics
    pub event_deliveries_total: IntCounterVec,
    pub dispatch_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new(
                "iothub_messages_total",
                "Messages handled by tenant and direction",
            ),
            &["tenant", "direction"],
        )?;

        let ingest_latency = Histogram::with_opts(
            HistogramOpts::new(
                "iothub_ingest_latency_seconds",
                "Time to resolve, classify and submit an upstream publish",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;

        let devices_online = IntGaugeVec::new(
            Opts::new("iothub_devices_online", "Devices currently online by tenant"),
            &["tenant"],
        )?;

        let auth_total = IntCounterVec::new(
            Opts::new("iothub_auth_total", "Device authentications by result"),
            &["result"],
        )?;

        let subscriptions_created_total = IntCounter::with_opts(Opts::new(
            "iothub_subscriptions_created_total",
            "Core subscription entities created",
        ))?;

        let subscriptions_removed_total = IntCounter::with_opts(Opts::new(
            "iothub_subscriptions_removed_total",
            "Device subscription mappings removed",
        ))?;

        let event_deliveries_total = IntCounterVec::new(
            Opts::new(
                "iothub_event_deliveries_total",
                "Event stream delivery reports by result",
            ),
            &["result"],
        )?;

        let dispatch_total = IntCounterVec::new(
            Opts::new(
                "iothub_dispatch_total",
                "Core notifications handled by returned status",
            ),
            &["status"],
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(ingest_latency.clone()))?;
        registry.register(Box::new(devices_online.clone()))?;
        registry.register(Box::new(auth_total.clone()))?;
        registry.register(Box::new(subscriptions_created_total.clone()))?;
        registry.register(Box::new(subscriptions_removed_total.clone()))?;
        registry.register(Box::new(event_deliveries_total.clone()))?;
        registry.register(Box::new(dispatch_total.clone()))?;

        Ok(Metrics {
            registry,
            messages_total,
            ingest_latency,
            devices_online,
            auth_total,
            subscriptions_created_total,
            subscriptions_removed_total,
            event_deliveries_total,
            dispatch_total,
        })
    }

    // Helper methods for common operations

    pub fn message(&self, tenant: &str, direction: Mark) {
        self.messages_total
            .with_label_values(&[tenant, direction.as_str()])
            .inc();
    }

    pub fn device_online(&self, tenant: &str) {
        self.devices_online.with_label_values(&[tenant]).inc();
    }

    pub fn device_offline(&self, tenant: &str) {
        self.devices_online.with_label_values(&[tenant]).dec();
    }

    pub fn auth_result(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.auth_total.with_label_values(&[result]).inc();
    }

    pub fn subscription_created(&self) {
        self.subscriptions_created_total.inc();
    }

    pub fn subscription_removed(&self) {
        self.subscriptions_removed_total.inc();
    }

    pub fn event_delivery(&self, delivered: bool) {
        let result = if delivered { "delivered" } else { "failed" };
        self.event_deliveries_total.with_label_values(&[result]).inc();
    }

    pub fn dispatch(&self, status: DispatchStatus) {
        self.dispatch_total
            .with_label_values(&[status.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_gauge_per_tenant() {
        let metrics = Metrics::new().unwrap();
        metrics.device_online("tenantA");
        metrics.device_online("tenantA");
        metrics.device_online("tenantB");
        metrics.device_offline("tenantA");

        assert_eq!(metrics.devices_online.with_label_values(&["tenantA"]).get(), 1);
        assert_eq!(metrics.devices_online.with_label_values(&["tenantB"]).get(), 1);
    }

    #[test]
    fn test_message_counter_labels() {
        let metrics = Metrics::new().unwrap();
        metrics.message("tenantA", Mark::Upstream);
        metrics.message("tenantA", Mark::Downstream);
        metrics.message("tenantA", Mark::Upstream);

        assert_eq!(
            metrics
                .messages_total
                .with_label_values(&["tenantA", "upstream"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .messages_total
                .with_label_values(&["tenantA", "downstream"])
                .get(),
            1
        );
    }

    #[test]
    fn test_text_exposition() {
        let metrics = Metrics::new().unwrap();
        metrics.auth_result(true);
        metrics.dispatch(DispatchStatus::Success);
        metrics.event_delivery(false);
        metrics.subscription_created();
        metrics.ingest_latency.observe(0.002);

        let encoder = prometheus::TextEncoder::new();
        let text = encoder.encode_to_string(&metrics.registry.gather()).unwrap();
        assert!(text.contains("iothub_auth_total{result=\"success\"} 1"));
        assert!(text.contains("iothub_dispatch_total{status=\"SUCCESS\"} 1"));
        assert!(text.contains("iothub_event_deliveries_total{result=\"failed\"} 1"));
        assert!(text.contains("iothub_subscriptions_created_total 1"));
        assert!(text.contains("iothub_ingest_latency_seconds_count 1"));
    }
}
