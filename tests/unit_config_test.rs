// tests/unit_config_test.rs

use std::time::Duration;
use unicon::config::Config;
use unicon::core::handlers::HandlerSettings;
use unicon::core::router::RouterSettings;
use unicon::core::store::StoreBackend;

#[test]
fn test_empty_document_uses_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 7878);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.store.backend, StoreBackend::File);
    assert_eq!(config.events.channel_capacity, 1024);
    assert_eq!(config.timeouts.operation, Duration::from_secs(60));
    assert!(!config.metrics.enabled);
}

#[test]
fn test_code_defaults_match_config_defaults() {
    let config = Config::from_toml("").unwrap();
    let from_config = config.router_settings();
    let built_in = RouterSettings::default();
    assert_eq!(from_config.connect_timeout, Duration::from_secs(15));
    assert_eq!(built_in.connect_timeout, from_config.connect_timeout);
    assert_eq!(built_in.operation_timeout, from_config.operation_timeout);
    assert_eq!(built_in.disconnect_timeout, from_config.disconnect_timeout);
    assert_eq!(
        HandlerSettings::default().connect_timeout,
        config.handler_settings().connect_timeout
    );
}

#[test]
fn test_full_document() {
    let config = Config::from_toml(
        r#"
        host = "0.0.0.0"
        port = 9000
        log_level = "debug,unicon=trace"

        [store]
        backend = "sqlite"
        path = "/var/lib/unicon/unicon.db"

        [timeouts]
        connect = "5s"
        operation = "2m"
        disconnect = "500ms"

        [tools]
        kubectl = "/opt/bin/kubectl"

        [metrics]
        enabled = true
        port = 9100
        "#,
    )
    .unwrap();

    assert_eq!(config.port, 9000);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(config.timeouts.operation, Duration::from_secs(120));
    assert_eq!(config.timeouts.disconnect, Duration::from_millis(500));

    let handler = config.handler_settings();
    assert_eq!(handler.connect_timeout, Duration::from_secs(5));
    assert_eq!(handler.kubectl_path.unwrap().to_str(), Some("/opt/bin/kubectl"));
    assert!(handler.grpcurl_path.is_none());

    let router = config.router_settings();
    assert_eq!(router.connect_timeout, Duration::from_secs(5));
    assert_eq!(router.operation_timeout, Duration::from_secs(120));
}

#[test]
fn test_validation_errors() {
    for (doc, needle) in [
        ("port = 0", "port cannot be 0"),
        ("host = \"  \"", "host cannot be empty"),
        ("[events]\nchannel_capacity = 0", "channel_capacity"),
        ("[timeouts]\noperation = \"0s\"", "timeouts.operation"),
        ("[store]\npath = \"\"", "store.path"),
        ("port = 9000\n[metrics]\nenabled = true\nport = 9000", "metrics.port"),
    ] {
        let err = Config::from_toml(doc).unwrap_err();
        assert!(format!("{err:#}").contains(needle), "{doc}: {err:#}");
    }
}

#[test]
fn test_memory_backend_needs_no_path() {
    let config = Config::from_toml("[store]\nbackend = \"memory\"\npath = \"\"").unwrap();
    assert_eq!(config.store.backend, StoreBackend::Memory);
}

#[test]
fn test_unknown_backend_is_rejected() {
    assert!(Config::from_toml("[store]\nbackend = \"redis\"").is_err());
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = 7000\n").unwrap();
    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.port, 7000);

    let missing = dir.path().join("missing.toml");
    assert!(Config::from_file(missing.to_str().unwrap()).is_err());
}
