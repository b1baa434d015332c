//! Topic classification tests

use super::*;
use proptest::prelude::*;

#[test]
fn test_templates_round_trip() {
    for kind in TopicKind::ALL {
        assert_eq!(
            classify(template_for(kind)),
            Some(kind),
            "template {} should classify as {:?}",
            kind.template(),
            kind
        );
    }
}

#[test]
fn test_classify_fixed_topics() {
    assert_eq!(classify("v1/devices/me/attributes"), Some(TopicKind::Attributes));
    assert_eq!(classify("v1/devices/me/telemetry"), Some(TopicKind::Telemetry));
    assert_eq!(classify("v1/devices/me/raw"), Some(TopicKind::Raw));
    assert_eq!(classify("v1/gateway/attributes"), Some(TopicKind::AttributesGateway));
    assert_eq!(classify("v1/gateway/telemetry"), Some(TopicKind::TelemetryGateway));
}

#[test]
fn test_classify_request_scoped_topics() {
    assert_eq!(
        classify("v1/devices/me/command/response"),
        Some(TopicKind::CommandResponse)
    );
    assert_eq!(
        classify("v1/devices/me/command/response/17"),
        Some(TopicKind::CommandResponse)
    );
    assert_eq!(
        classify("v1/devices/me/command/request/abc"),
        Some(TopicKind::CommandRequest)
    );
    assert_eq!(
        classify("v1/devices/me/attributes/request/1"),
        Some(TopicKind::AttributesRequest)
    );
    assert_eq!(
        classify("v1/devices/me/attributes/response/+"),
        Some(TopicKind::AttributesResponse)
    );
}

#[test]
fn test_classify_invalid() {
    assert_eq!(classify(""), None);
    assert_eq!(classify("v1/devices/me"), None);
    assert_eq!(classify("v1/devices/me/telemetry/extra"), None);
    assert_eq!(classify("v1/devices/me/command/request/a/b"), None);
    assert_eq!(classify("v1/devices/me/command/request/#"), None);
    assert_eq!(classify("sensors/temperature"), None);
}

#[test]
fn test_request_id_extraction() {
    assert_eq!(
        request_id(
            TopicKind::CommandRequest,
            "dev1/v1/devices/me/command/request/42"
        ),
        Some("42")
    );
    assert_eq!(
        request_id(
            TopicKind::AttributesRequest,
            "v1/devices/me/attributes/request/r-7"
        ),
        Some("r-7")
    );
    assert_eq!(
        request_id(TopicKind::CommandRequest, "v1/devices/me/command/request/+"),
        None
    );
    assert_eq!(request_id(TopicKind::Attributes, "v1/devices/me/attributes"), None);
}

#[test]
fn test_fill_template() {
    assert_eq!(
        TopicKind::CommandRequest.fill("9"),
        "v1/devices/me/command/request/9"
    );
    assert_eq!(TopicKind::Attributes.fill("9"), "v1/devices/me/attributes");
}

#[test]
fn test_owner_from_topic() {
    assert_eq!(
        owner_from_topic("dev3/v1/devices/me/telemetry"),
        Some("dev3".to_string())
    );
    assert_eq!(owner_from_topic("dev3"), None);
    assert_eq!(owner_from_topic("/v1/devices/me/telemetry"), None);
}

#[test]
fn test_owner_from_lwm2m_topic() {
    assert_eq!(
        owner_from_topic("lwm2m/dev1@secretpw/v1/devices/me/telemetry"),
        Some("dev1".to_string())
    );
    let (device, relative) = split_device_topic("lwm2m/dev1@pw/v1/devices/me/raw").unwrap();
    assert_eq!(device, "dev1");
    assert_eq!(relative, "v1/devices/me/raw");
}

#[test]
fn test_classify_device_topic() {
    assert_eq!(
        classify_device_topic("dev3/v1/devices/me/telemetry"),
        Some(TopicKind::Telemetry)
    );
    assert_eq!(
        classify_device_topic("v1/devices/me/attributes"),
        Some(TopicKind::Attributes)
    );
    assert_eq!(
        classify_device_topic("lwm2m/dev1@pw/v1/devices/me/attributes"),
        Some(TopicKind::Attributes)
    );
    assert_eq!(classify_device_topic("dev3/unknown/topic"), None);
}

#[test]
fn test_device_topic() {
    assert_eq!(
        device_topic("dev3", TopicKind::Attributes, None),
        "dev3/v1/devices/me/attributes"
    );
    assert_eq!(
        device_topic("dev3", TopicKind::CommandRequest, Some("5")),
        "dev3/v1/devices/me/command/request/5"
    );
}

#[test]
fn test_subscribable_kinds() {
    assert!(TopicKind::Attributes.is_subscribable());
    assert!(TopicKind::CommandRequest.is_subscribable());
    assert!(!TopicKind::Telemetry.is_subscribable());
    assert!(!TopicKind::CommandResponse.is_subscribable());
    assert!(TopicKind::AttributesResponse.is_subscribable());
    assert!(!TopicKind::AttributesResponse.needs_core_subscription());
}

proptest! {
    #[test]
    fn prop_mounted_templates_classify(device in "[a-zA-Z0-9_\\-]{1,24}", idx in 0usize..9) {
        prop_assume!(device != LWM2M_MARKER);
        let kind = TopicKind::ALL[idx];
        let topic = format!("{}/{}", device, kind.template());
        prop_assert_eq!(classify_device_topic(&topic), Some(kind));
        prop_assert_eq!(owner_from_topic(&topic), Some(device));
    }

    #[test]
    fn prop_request_id_round_trip(id in "[a-zA-Z0-9\\-]{1,16}") {
        let topic = device_topic("dev", TopicKind::CommandRequest, Some(&id));
        prop_assert_eq!(request_id(TopicKind::CommandRequest, &topic), Some(id.as_str()));
    }
}
