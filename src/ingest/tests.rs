//! Upstream ingest tests

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::config::DEFAULT_LOOPBACK_CLIENT_ID;
use crate::testing::Harness;

const TELEMETRY: &str = "dev3/v1/devices/me/telemetry";

#[tokio::test]
async fn test_telemetry_reaches_event_stream() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest("dev3", TELEMETRY, br#"{"t":21.5}"#, "client-3")
        .await
        .unwrap();
    assert_eq!(verdict, IngestVerdict::Accepted);

    let submitted = harness.stream.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    let (partition_key, event) = &submitted[0];
    assert_eq!(partition_key, "dev3");
    assert_eq!(event.data.owner, "tenantA");
    assert_eq!(event.topic, "core-pub");
    assert_eq!(event.pubsubname, "iothub-pubsub");

    let raw = event.data.raw_data();
    assert_eq!(raw.kind, PropertyKind::Telemetry);
    assert_eq!(raw.mark, Mark::Upstream);
    assert_eq!(raw.values, json!({"t": 21.5}));
    assert_eq!(raw.path, TELEMETRY);

    assert_eq!(
        harness
            .metrics
            .messages_total
            .with_label_values(&["tenantA", "upstream"])
            .get(),
        1
    );
    assert_eq!(harness.metrics.ingest_latency.get_sample_count(), 1);
}

#[tokio::test]
async fn test_loopback_is_not_forwarded() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest(
            "dev3",
            "dev3/v1/devices/me/attributes",
            br#"{"thresh":5}"#,
            DEFAULT_LOOPBACK_CLIENT_ID,
        )
        .await
        .unwrap();

    assert!(verdict.is_accepted());
    assert!(harness.stream.submitted.lock().is_empty());
    assert_eq!(
        harness
            .metrics
            .messages_total
            .with_label_values(&["tenantA", "downstream"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_loopback_accepted_for_unknown_device() {
    let harness = Harness::new();
    harness.store.fail.store(true, Ordering::SeqCst);
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest("ghost", "ghost/x", b"", DEFAULT_LOOPBACK_CLIENT_ID)
        .await
        .unwrap();
    assert_eq!(verdict, IngestVerdict::Accepted);
    assert!(harness.stream.submitted.lock().is_empty());
    assert_eq!(
        harness
            .metrics
            .messages_total
            .with_label_values(&[UNKNOWN_TENANT, "downstream"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_loopback_without_owner_counted_as_unknown() {
    let harness = Harness::new();
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest("ghost", "ghost/x", b"{}", DEFAULT_LOOPBACK_CLIENT_ID)
        .await
        .unwrap();
    assert!(verdict.is_accepted());
    assert_eq!(
        harness
            .metrics
            .messages_total
            .with_label_values(&[UNKNOWN_TENANT, "downstream"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_unauthenticated_device_is_rejected() {
    let harness = Harness::new();
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest("dev3", TELEMETRY, b"{}", "client-3")
        .await
        .unwrap();
    assert_eq!(verdict, IngestVerdict::Rejected);
    assert!(harness.stream.submitted.lock().is_empty());
}

#[tokio::test]
async fn test_unknown_topic_forwarded_as_raw() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    pipeline
        .ingest("dev3", "dev3/custom/stream", b"plain text", "client-3")
        .await
        .unwrap();

    let events = harness.stream.events();
    let raw = events[0].data.raw_data();
    assert_eq!(raw.kind, PropertyKind::RawData);
    assert_eq!(raw.mark, Mark::Upstream);
    assert_eq!(raw.values, json!("plain text"));
    assert_eq!(raw.path, "dev3/custom/stream");
}

#[tokio::test]
async fn test_gateway_and_command_kinds() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    pipeline
        .ingest("dev3", "dev3/v1/gateway/attributes", br#"{"a":1}"#, "c")
        .await
        .unwrap();
    pipeline
        .ingest("dev3", "dev3/v1/devices/me/command/response/7", br#"{"ok":true}"#, "c")
        .await
        .unwrap();

    let kinds: Vec<_> = harness
        .stream
        .events()
        .iter()
        .map(|e| e.data.raw_data().kind)
        .collect();
    assert_eq!(kinds, vec![PropertyKind::Attributes, PropertyKind::Commands]);
}

#[tokio::test]
async fn test_submit_failure_still_accepts() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    harness.stream.fail.store(true, Ordering::SeqCst);
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest("dev3", TELEMETRY, b"{}", "client-3")
        .await
        .unwrap();
    assert_eq!(verdict, IngestVerdict::Accepted);
}

#[tokio::test]
async fn test_store_failure_surfaces() {
    let harness = Harness::new();
    harness.store.fail.store(true, Ordering::SeqCst);
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let result = pipeline.ingest("dev3", TELEMETRY, b"{}", "client-3").await;
    assert!(matches!(result, Err(BridgeError::StateStore(_))));
}

#[tokio::test]
async fn test_attribute_request_is_answered() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    *harness.core.attributes.lock() = json!({"thresh": 5, "mode": "eco", "other": 1});
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest(
            "dev3",
            "dev3/v1/devices/me/attributes/request/42",
            br#"{"keys":"thresh, mode"}"#,
            "client-3",
        )
        .await
        .unwrap();
    assert!(verdict.is_accepted());
    assert!(harness.stream.submitted.lock().is_empty());

    let published = harness.publisher.published.lock().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "dev3/v1/devices/me/attributes/response/42");
    assert_eq!(published[0].client_id, DEFAULT_LOOPBACK_CLIENT_ID);
    let payload: serde_json::Value = serde_json::from_str(&published[0].payload).unwrap();
    assert_eq!(payload, json!({"thresh": 5, "mode": "eco"}));
}

#[tokio::test]
async fn test_attribute_request_failure_is_swallowed() {
    let harness = Harness::new();
    harness.authenticated("dev3", "tenantA").await;
    harness.core.fail.store(true, Ordering::SeqCst);
    let pipeline = UpstreamPipeline::new(harness.context.clone());

    let verdict = pipeline
        .ingest(
            "dev3",
            "dev3/v1/devices/me/attributes/request/42",
            br#"{"keys":"thresh"}"#,
            "client-3",
        )
        .await
        .unwrap();
    assert!(verdict.is_accepted());
    assert!(harness.publisher.published.lock().is_empty());
}

#[test]
fn test_attributes_query_keys() {
    let query: AttributesQuery = serde_json::from_str(r#"{"keys":"a,,b , c"}"#).unwrap();
    assert_eq!(query.keys(), vec!["a", "b", "c"]);
    assert!(AttributesQuery::default().keys().is_empty());
}
