use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::{ClientConfig, PartialSettings, Settings, load_config_from};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.connection.url, "wss://pubsub.crowdcontrol.live/");
    assert_eq!(settings.reconnect.base_delay_ms, 1_000);
    assert_eq!(settings.reconnect.max_attempts, 0);
    assert_eq!(settings.keepalive.interval_secs, 30);
    assert_eq!(settings.protocol.max_protocol_errors, 16);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_empty_partial_yields_defaults() {
    let merged = PartialSettings::default().merge(Settings::default());
    assert_eq!(merged, Settings::default());
}

#[test]
fn test_client_config_from_settings() {
    let mut settings = Settings::default();
    settings.reconnect.max_attempts = 5;
    settings
        .connection
        .headers
        .insert("X-Client".into(), "ccpubsub".into());

    let config = settings.client_config();
    assert_eq!(config.backoff.max_attempts, Some(5));
    assert_eq!(config.backoff.base, Duration::from_secs(1));
    assert_eq!(config.keepalive_timeout, Duration::from_secs(10));
    assert_eq!(config.headers, vec![("X-Client".to_string(), "ccpubsub".to_string())]);
    assert_eq!(config.event_log_limit, 100);

    assert_eq!(Settings::default().client_config().backoff.max_attempts, None);
}

#[test]
fn test_client_config_builder() {
    let config = ClientConfig::new("ws://127.0.0.1:9000")
        .with_header("X-Test", "1")
        .with_auto_reconnect(false)
        .with_keepalive(Duration::from_secs(5), Duration::from_secs(2))
        .with_request_timeout(Duration::from_millis(500));
    assert_eq!(config.url, "ws://127.0.0.1:9000");
    assert_eq!(config.headers.len(), 1);
    assert!(!config.auto_reconnect);
    assert_eq!(config.keepalive_interval, Duration::from_secs(5));
    assert_eq!(config.request_timeout, Duration::from_millis(500));
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let toml = r#"
        [connection]
        url = "ws://127.0.0.1:9000"
        token = "file-token"

        [reconnect]
        max_attempts = 3

        [keepalive]
        interval_secs = 5
    "#;
    fs::write(tmp.path().join("default.toml"), toml).expect("write config file");

    let settings = load_config_from(tmp.path()).expect("load config");
    assert_eq!(settings.connection.url, "ws://127.0.0.1:9000");
    assert_eq!(settings.connection.token.as_deref(), Some("file-token"));
    assert_eq!(settings.reconnect.max_attempts, 3);
    assert_eq!(settings.keepalive.interval_secs, 5);
    // untouched values keep their defaults
    assert_eq!(settings.keepalive.timeout_secs, 10);
    assert_eq!(settings.reconnect.multiplier, 2.0);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    fs::write(
        tmp.path().join("default.toml"),
        "[connection]\nurl = \"ws://file:1\"\n",
    )
    .expect("write config file");

    temp_env::with_vars(
        [
            ("CCPUBSUB_CONNECTION__URL", Some("ws://env:2")),
            ("CCPUBSUB_REQUEST__DEFAULT_TIMEOUT_MS", Some("2500")),
        ],
        || {
            let settings = load_config_from(tmp.path()).expect("load config");
            assert_eq!(settings.connection.url, "ws://env:2");
            assert_eq!(settings.request.default_timeout_ms, 2500);
        },
    );
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let settings = load_config_from(tmp.path()).expect("load config");
    assert_eq!(settings, Settings::default());
}
