//! Config module tests

use super::*;
use std::time::Duration;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("IOTHUB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${IOTHUB_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("IOTHUB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("IOTHUB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${IOTHUB_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("IOTHUB_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${IOTHUB_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("IOTHUB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("IOTHUB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${IOTHUB_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("iothub.toml");

    std::env::set_var("IOTHUB_TEST_BROKER_PASSWORD", "s3cret");

    let config_content = r#"
[broker]
base_url = "http://emqx:8081/api"
password = "${IOTHUB_TEST_BROKER_PASSWORD}"
timeout = "${IOTHUB_TEST_BROKER_TIMEOUT:-3s}"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.broker.base_url, "http://emqx:8081/api");
    assert_eq!(config.broker.password, "s3cret");
    assert_eq!(config.broker.timeout, Duration::from_secs(3));

    std::env::remove_var("IOTHUB_TEST_BROKER_PASSWORD");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let config = Config::load("/nonexistent/iothub.toml").unwrap();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.store.backend, StoreBackend::Memory);
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.bridge.loopback_client_id, DEFAULT_LOOPBACK_CLIENT_ID);
    assert_eq!(config.bridge.source, "iothub");
    assert_eq!(config.event_stream.pubsub_name, "iothub-pubsub");
    assert_eq!(config.event_stream.topic, "core-pub");
    assert_eq!(config.core.subscription_topic, "sub-core");
    assert_eq!(config.store.store_name, "iothub-private-store");
    assert!(!config.metrics.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.core.timeout, Duration::from_secs(5));
    assert_eq!(config.broker.qos, 0);
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:18080"

[core]
base_url = "http://core:6789/apis"
timeout = "2s"
tenant = "sys"

[broker]
base_url = "http://emqx:8081/api"
username = "bridge"
password = "pw"
qos = 1

[event_stream]
base_url = "http://sidecar:3500"
topic = "core-pub-2"
report_capacity = 16

[store]
backend = "fjall"
path = "/var/lib/iothub"

[bridge]
loopback_client_id = "@internal"

[metrics]
enabled = true
bind = "127.0.0.1:19090"
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.bind.port(), 18080);
    assert_eq!(config.core.base_url, "http://core:6789/apis");
    assert_eq!(config.core.timeout, Duration::from_secs(2));
    assert_eq!(config.core.tenant, "sys");
    assert_eq!(config.core.role, "admin");
    assert_eq!(config.broker.username, "bridge");
    assert_eq!(config.broker.qos, 1);
    assert_eq!(config.event_stream.topic, "core-pub-2");
    assert_eq!(config.event_stream.report_capacity, 16);
    assert_eq!(config.store.backend, StoreBackend::Fjall);
    assert_eq!(config.store.path, "/var/lib/iothub");
    assert_eq!(config.bridge.loopback_client_id, "@internal");
    assert!(config.metrics.enabled);
}

#[test]
fn test_fjall_backend_requires_path() {
    let result = Config::parse(
        r#"
[store]
backend = "fjall"
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_empty_loopback_id_rejected() {
    let result = Config::parse(
        r#"
[bridge]
loopback_client_id = ""
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_empty_base_url_rejected() {
    let result = Config::parse(
        r#"
[core]
base_url = ""
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_qos_rejected() {
    let result = Config::parse(
        r#"
[broker]
qos = 3
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_unknown_backend_rejected() {
    let result = Config::parse(
        r#"
[store]
backend = "redis"
"#,
    );
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}
