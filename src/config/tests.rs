use std::fs;
use std::path::Path;

use serial_test::serial;
use tempfile::TempDir;

use super::load_config;
use super::settings::{PartialBrokerSettings, PartialSettings, Settings};
use crate::transport::Scheme;

/// Run `f` with the working directory switched to a fresh temp dir.
fn in_temp_dir<R>(f: impl FnOnce(&Path) -> R) -> R {
    let dir = TempDir::new().unwrap();
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let result = f(dir.path());
    std::env::set_current_dir(previous).unwrap();
    result
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.broker.url, None);
    assert_eq!(settings.broker.host, "shared-activemq");
    assert_eq!(settings.broker.port, 61616);
    assert_eq!(settings.broker.username, "admin");
    assert_eq!(settings.broker.heartbeat_send_ms, 5000);
    assert_eq!(settings.delivery.destination, "/topic/book-purchases");
    assert_eq!(settings.delivery.max_attempts, 3);
    assert_eq!(settings.delivery.send_retry_delay_ms, 2000);
    assert_eq!(settings.delivery.resubscribe_delay_ms, 5000);
    assert_eq!(settings.delivery.prefetch, 10);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_merge_keeps_defaults_for_missing_values() {
    let partial = PartialSettings {
        broker: Some(PartialBrokerSettings {
            port: Some(61613),
            ..Default::default()
        }),
        ..Default::default()
    };
    let settings = Settings::merge(partial);
    assert_eq!(settings.broker.port, 61613);
    assert_eq!(settings.broker.host, "shared-activemq");
    assert_eq!(settings.delivery.max_attempts, 3);
}

#[test]
#[serial]
fn test_load_config_from_file() {
    let settings = temp_env::with_vars_unset(
        ["EVENTLINK_BROKER__HOST", "EVENTLINK_DELIVERY__MAX_ATTEMPTS"],
        || {
            in_temp_dir(|dir| {
                fs::create_dir(dir.join("config")).unwrap();
                fs::write(
                    dir.join("config/default.toml"),
                    "[broker]\nhost = \"broker.internal\"\nport = 61613\n\n[logging]\nlevel = \"debug\"\n",
                )
                .unwrap();
                load_config().unwrap()
            })
        },
    );

    assert_eq!(settings.broker.host, "broker.internal");
    assert_eq!(settings.broker.port, 61613);
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.broker.username, "admin");
}

#[test]
#[serial]
fn test_env_overrides_defaults() {
    let settings = temp_env::with_vars(
        [
            ("EVENTLINK_BROKER__HOST", Some("env-broker")),
            ("EVENTLINK_DELIVERY__MAX_ATTEMPTS", Some("5")),
        ],
        || in_temp_dir(|_| load_config().unwrap()),
    );

    assert_eq!(settings.broker.host, "env-broker");
    assert_eq!(settings.delivery.max_attempts, 5);
    assert_eq!(settings.delivery.prefetch, 10);
}

#[test]
fn test_endpoint_from_host_and_port() {
    let settings = Settings::default();
    let endpoint = settings.endpoint().unwrap();
    assert_eq!(endpoint.scheme, Scheme::Tcp);
    assert_eq!(endpoint.address(), "shared-activemq:61616");
    assert_eq!(endpoint.username, "admin");
    assert_eq!(endpoint.heartbeat.send_ms, 5000);
}

#[test]
fn test_endpoint_url_wins_over_host() {
    let mut settings = Settings::default();
    settings.broker.url = Some("ws://guest:secret@localhost:61614/stomp".to_string());
    settings.broker.connect_timeout_ms = 250;

    let endpoint = settings.endpoint().unwrap();
    assert_eq!(endpoint.scheme, Scheme::Ws);
    assert_eq!(endpoint.address(), "localhost:61614");
    assert_eq!(endpoint.username, "guest");
    assert_eq!(endpoint.password, "secret");
    assert_eq!(endpoint.connect_timeout.as_millis(), 250);
}

#[test]
fn test_endpoint_rejects_unknown_scheme() {
    let mut settings = Settings::default();
    settings.broker.url = Some("http://localhost:8161".to_string());
    assert!(settings.endpoint().is_err());
}
