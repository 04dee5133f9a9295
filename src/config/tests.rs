//! Tests for config functionality.

use crate::config::EngineConfig;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = EngineConfig::default();

    assert_eq!(config.lock_poll_interval_ms, 50);
    assert_eq!(config.lock_stale_minutes, 120);
    assert_eq!(config.default_lock_timeout_ms, 30_000);
    assert_eq!(config.record_guard_timeout_ms, 5_000);
    assert_eq!(config.resume_interval_ms, 1_000);
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.max_transitions, 1_000);
    assert_eq!(config.default_retry_delay_ms, 1_000);
}

#[test]
fn test_parse_minimal_yaml() {
    let config = EngineConfig::from_yaml("").unwrap();
    assert_eq!(config.max_workers, 4);
    assert_eq!(config.lock_stale_minutes, 120);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
max_workers: 16
lock_poll_interval_ms: 10
"#;
    let config = EngineConfig::from_yaml(yaml).unwrap();

    assert_eq!(config.max_workers, 16);
    assert_eq!(config.lock_poll_interval(), Duration::from_millis(10));

    // Unspecified values should use defaults
    assert_eq!(config.max_transitions, 1_000);
}

#[test]
fn test_unknown_fields_ignored() {
    let yaml = r#"
max_workers: 2
future_knob: true
"#;
    let config = EngineConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.max_workers, 2);
}

#[test]
fn test_zero_values_rejected() {
    let err = EngineConfig::from_yaml("max_workers: 0").unwrap_err();
    assert!(err.to_string().contains("max_workers"));

    let err = EngineConfig::from_yaml("max_transitions: 0").unwrap_err();
    assert!(err.to_string().contains("max_transitions"));

    let err = EngineConfig::from_yaml("lock_poll_interval_ms: 0").unwrap_err();
    assert!(err.to_string().contains("lock_poll_interval_ms"));
}

#[test]
fn test_record_guard_timeout_floor() {
    for value in [0, 1, 50, 99] {
        let err = EngineConfig::from_yaml(&format!("record_guard_timeout_ms: {}", value)).unwrap_err();
        assert!(err.to_string().contains("record_guard_timeout_ms"), "{}", value);
    }
    let config = EngineConfig::from_yaml("record_guard_timeout_ms: 100").unwrap();
    assert_eq!(config.record_guard_timeout(), Duration::from_millis(100));
}

#[test]
fn test_invalid_yaml_is_error() {
    assert!(EngineConfig::from_yaml("max_workers: [").is_err());
    assert!(EngineConfig::from_yaml("max_workers: lots").is_err());
}

#[test]
fn test_yaml_roundtrip_keeps_values() {
    let mut config = EngineConfig::default();
    config.resume_interval_ms = 250;
    let yaml = config.to_yaml().unwrap();
    let parsed = EngineConfig::from_yaml(&yaml).unwrap();
    assert_eq!(parsed.resume_interval(), Duration::from_millis(250));
}

#[test]
fn test_load_or_default_missing_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EngineConfig::load_or_default(dir.path().join("config.yaml")).unwrap();
    assert_eq!(config.max_workers, 4);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "max_transitions: 7\n").unwrap();
    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.max_transitions, 7);
}
