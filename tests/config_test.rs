//! Tests for config module

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use afk_rotator::config::{AuthMode, Config, ConfigError, DEFAULT_ROTATION_INTERVAL_MS};
use serial_test::serial;
use tempfile::NamedTempFile;

const ENV_VARS: [&str; 5] = [
    "AFK_ROTATOR_HOST",
    "AFK_ROTATOR_PORT",
    "AFK_ROTATOR_IDENTITY",
    "AFK_ROTATOR_SECRET",
    "AFK_ROTATOR_STATE_PATH",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

// ============================================================================
// Root config.toml
// ============================================================================

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_config_toml_readable() {
    let content =
        std::fs::read_to_string("config.toml").expect("Should be able to read config.toml");

    // Basic validation - should have expected sections
    for section in [
        "[endpoint]",
        "[credentials]",
        "[rotation]",
        "[auto_reconnect]",
        "[session]",
        "[state]",
        "[logging]",
    ] {
        assert!(
            content.contains(section),
            "config.toml should have {section} section"
        );
    }
}

#[test]
#[serial]
fn test_root_config_loads() {
    clear_env();
    let config = Config::load(Path::new("config.toml")).expect("config.toml should load");

    assert_eq!(config.endpoint.host, "localhost");
    assert_eq!(config.endpoint.port, 25565);
    assert_eq!(config.credentials.identity.as_deref(), Some("AFK_Keeper"));
    assert_eq!(config.credentials.auth_mode, AuthMode::Offline);
    assert!(!config.rotation.enabled);
    assert_eq!(
        config.rotation.interval(),
        Duration::from_millis(DEFAULT_ROTATION_INTERVAL_MS)
    );
    assert!(config.auto_reconnect.enabled);
    assert_eq!(config.behavior.get("anti_idle"), Some(&serde_json::Value::Bool(true)));
}

// ============================================================================
// File formats
// ============================================================================

#[test]
#[serial]
fn test_json_settings_with_camel_case_keys() {
    clear_env();
    let file = write_config(
        ".json",
        r#"{
            "rotation": {
                "enabled": true,
                "pool": ["alpha", "beta"],
                "intervalMs": 60000
            },
            "endpoint": { "host": "mc.example.net", "port": 25566, "version": "1.20.4" },
            "credentials": { "username": "KeeperBot", "password": "hunter2" },
            "autoReconnect": { "enabled": false, "delayMs": 5000 },
            "behavior": { "antiIdle": true }
        }"#,
    );

    let config = Config::load(file.path()).expect("json settings should load");
    assert!(config.rotation.enabled);
    assert_eq!(
        config.rotation.pool.as_deref(),
        Some(&["alpha".to_string(), "beta".to_string()][..])
    );
    assert_eq!(config.rotation.interval(), Duration::from_secs(60));
    assert_eq!(config.endpoint.protocol_version.as_deref(), Some("1.20.4"));
    assert_eq!(config.credentials.secret.as_deref(), Some("hunter2"));
    assert!(!config.auto_reconnect.enabled);
    assert_eq!(config.auto_reconnect.delay_ms, 5_000);

    let scheduler = config.scheduler_config();
    assert_eq!(scheduler.default_identity.as_deref(), Some("KeeperBot"));
    assert!(!scheduler.reconnect.enabled);
}

#[test]
#[serial]
fn test_missing_host_is_parse_error() {
    clear_env();
    let file = write_config(".toml", "[credentials]\nidentity = \"KeeperBot\"\n");

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got {err}");
}

#[test]
fn test_missing_file_is_read_error() {
    let err = Config::load(Path::new("does/not/exist.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
#[serial]
fn test_rotation_disabled_without_identity_is_invalid() {
    clear_env();
    let file = write_config(".toml", "[endpoint]\nhost = \"localhost\"\n");

    let err = Config::load(file.path()).unwrap_err();
    assert!(
        matches!(&err, ConfigError::Invalid { field, .. } if field == "credentials.identity"),
        "got {err}"
    );
}

#[test]
#[serial]
fn test_synthetic_rotation_needs_no_identity() {
    clear_env();
    let file = write_config(
        ".toml",
        "[endpoint]\nhost = \"localhost\"\n\n[rotation]\nenabled = true\n\n[rotation.names]\nseed = 7\n",
    );

    let config = Config::load(file.path()).expect("synthetic rotation config should load");
    let mut provider = config.identity_provider();
    assert!(!provider.is_pool());
    let name = provider.next().unwrap();
    assert!(name.starts_with("AFK_"));
    assert!(name.len() <= 16);
}

// ============================================================================
// Environment overrides
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let file = write_config(
        ".toml",
        "[endpoint]\nhost = \"localhost\"\n\n[credentials]\nidentity = \"KeeperBot\"\n",
    );

    std::env::set_var("AFK_ROTATOR_HOST", "play.example.net");
    std::env::set_var("AFK_ROTATOR_PORT", "25570");
    std::env::set_var("AFK_ROTATOR_IDENTITY", "NightShift");
    std::env::set_var("AFK_ROTATOR_STATE_PATH", "/tmp/afk-state.json");
    let loaded = Config::load(file.path());
    clear_env();

    let config = loaded.expect("config with env overrides should load");
    assert_eq!(config.endpoint.host, "play.example.net");
    assert_eq!(config.endpoint.port, 25570);
    assert_eq!(config.credentials.identity.as_deref(), Some("NightShift"));
    assert_eq!(
        config.state.path.as_deref(),
        Some(Path::new("/tmp/afk-state.json"))
    );
}

#[test]
#[serial]
fn test_env_invalid_port_is_rejected() {
    clear_env();
    let file = write_config(
        ".toml",
        "[endpoint]\nhost = \"localhost\"\n\n[credentials]\nidentity = \"KeeperBot\"\n",
    );

    std::env::set_var("AFK_ROTATOR_PORT", "not-a-port");
    let loaded = Config::load(file.path());
    clear_env();

    let err = loaded.unwrap_err();
    assert!(
        matches!(&err, ConfigError::Invalid { field, .. } if field == "endpoint.port"),
        "got {err}"
    );
}
