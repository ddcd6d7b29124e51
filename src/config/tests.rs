use super::settings::{PartialSessionSettings, PartialSettings};
use super::*;
use crate::messages::LatencyMode;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 7000);
    assert_eq!(settings.server.mode, ListenMode::Direct);
    assert_eq!(settings.session.channel_prefix, "chat:");
    assert_eq!(settings.session.ping_interval_ms, 5000);
    assert_eq!(settings.session.latency_mode, LatencyMode::SenderEmbedded);
    assert!(settings.database.uri.is_none());
}

#[test]
fn test_partial_merge_keeps_defaults_for_missing_fields() {
    let partial = PartialSettings {
        session: Some(PartialSessionSettings {
            channel_prefix: None,
            ping_interval_ms: Some(250),
            probe_timeout_ms: None,
            connect_timeout_ms: None,
            latency_mode: Some(LatencyMode::ReceiverComputed),
        }),
        ..Default::default()
    };

    let settings = partial.merge_onto(Settings::default());
    assert_eq!(settings.session.ping_interval_ms, 250);
    assert_eq!(settings.session.latency_mode, LatencyMode::ReceiverComputed);
    assert_eq!(settings.session.channel_prefix, "chat:");
    assert_eq!(settings.server, Settings::default().server);
}

#[test]
#[serial]
fn test_environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("ROOMLINK_SERVER__PORT", Some("7100")),
            ("ROOMLINK_SERVER__MODE", Some("fronted")),
            ("ROOMLINK_AUTH__BACKEND_URL", Some("https://chat.example.com")),
            (
                "ROOMLINK_AUTH__ALLOWED_ORIGINS",
                Some("https://a.example.com,https://b.example.com"),
            ),
            ("ROOMLINK_DATABASE__URI", Some("mongodb://localhost/chat")),
            ("ROOMLINK_SESSION__LATENCY_MODE", Some("receiver_computed")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 7100);
            assert_eq!(cfg.server.mode, ListenMode::Fronted);
            assert_eq!(cfg.auth.backend_url, "https://chat.example.com");
            assert_eq!(
                cfg.auth.allowed_origins,
                vec!["https://a.example.com", "https://b.example.com"]
            );
            assert_eq!(cfg.database.uri.as_deref(), Some("mongodb://localhost/chat"));
            assert_eq!(cfg.session.latency_mode, LatencyMode::ReceiverComputed);
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn test_config_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [session]
        channel_prefix = "room:"
        ping_interval_ms = 1000

        [log]
        level = "debug"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();

    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.session.channel_prefix, "room:");
    assert_eq!(cfg.session.ping_interval_ms, 1000);
    assert_eq!(cfg.log.level, "debug");
    assert_eq!(cfg.auth.token_ttl_secs, 3600);
}
