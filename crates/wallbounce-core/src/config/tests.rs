//! Tests for configuration loading and validation.

use super::*;

fn two_valid_providers() -> String {
    r#"
        [[providers]]
        id = "cli-alpha"
        vendor = "alpha"
        tier = 1
        kind = "subprocess"
        command = "alpha-cli"

        [[providers]]
        id = "sdk-beta"
        vendor = "beta"
        tier = 3
        kind = "sdk"
        base_url = "http://localhost:8080/v1"
        model = "beta-large"
        api_key_secret = "beta_api_key"
    "#
    .to_string()
}

#[test]
fn empty_toml_yields_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.dispatch.min_providers, 2);
    assert_eq!(config.dispatch.per_adapter_timeout_ms, 30_000);
    assert_eq!(config.dispatch.whole_dispatch_timeout_ms, 90_000);
    assert_eq!(config.dispatch.tool_invocation_timeout_ms, 25_000);
    assert_eq!(config.dispatch.default_mode, "parallel");
    assert!((config.consensus.confidence_floor - 0.7).abs() < f64::EPSILON);
    assert!((config.consensus.consensus_floor - 0.6).abs() < f64::EPSILON);
    assert!(!config.consensus.auto_escalate);
    assert_eq!(config.session.ttl_seconds, 2_592_000);
    assert_eq!(config.session.context_window_turns, 4);
    assert_eq!(config.approval.timeout_ms, 60_000);
    assert!(!config.approval.auto_mode);
    assert_eq!(config.approval.sandbox_level_default, "read-only");
    assert_eq!(config.events.buffer_size, 64);
    assert_eq!(config.storage.backend, "memory");
}

#[test]
fn full_toml_parses() {
    let toml = format!(
        r#"
        {providers}

        [dispatch]
        min_providers = 3
        eager = true
        default_mode = "sequential"
        default_depth = 4

        [consensus]
        confidence_floor = 0.8
        auto_escalate = true

        [session]
        ttl_seconds = 86400
        turn2_min_providers = 3

        [approval]
        auto_mode = true
        timeout_ms = 30000
        sandbox_level_default = "isolated"

        [events]
        buffer_size = 128

        [storage]
        backend = "sqlite"
        db_path = "/tmp/wb.db"
        "#,
        providers = two_valid_providers()
    );

    let config = Config::from_toml(&toml).unwrap();
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.dispatch.min_providers, 3);
    assert!(config.dispatch.eager);
    assert_eq!(config.dispatch.default_mode, "sequential");
    assert!((config.consensus.confidence_floor - 0.8).abs() < f64::EPSILON);
    assert!(config.consensus.auto_escalate);
    assert_eq!(config.session.turn2_min_providers, 3);
    assert!(config.approval.auto_mode);
    assert_eq!(config.storage.backend, "sqlite");
    config.validate().unwrap();
}

#[test]
fn validation_passes_for_minimal_valid_config() {
    let config = Config::from_toml(&two_valid_providers()).unwrap();
    config.validate().unwrap();
}

#[test]
fn validation_requires_two_providers() {
    let config = Config::from_toml("").unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.to_string().contains("providers (at least two are required)")));
}

#[test]
fn validation_collects_multiple_errors() {
    let toml = r#"
        [dispatch]
        min_providers = 1
        default_depth = 9

        [consensus]
        confidence_floor = 1.5

        [[providers]]
        id = "p1"
        vendor = "v1"
        kind = "carrier-pigeon"

        [[providers]]
        id = "p2"
        vendor = "v2"
        kind = "sdk"
    "#;
    let config = Config::from_toml(toml).unwrap();
    let errors = config.validate().unwrap_err();

    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    assert!(messages.iter().any(|m| m.contains("dispatch.min_providers")));
    assert!(messages.iter().any(|m| m.contains("dispatch.default_depth")));
    assert!(messages
        .iter()
        .any(|m| m.contains("consensus.confidence_floor")));
    assert!(messages.iter().any(|m| m.contains("carrier-pigeon")));
    // The sdk provider is missing base_url, model, and api_key_secret.
    assert!(messages.iter().any(|m| m.contains("providers.p2.base_url")));
    assert!(messages.iter().any(|m| m.contains("providers.p2.model")));
    assert!(messages
        .iter()
        .any(|m| m.contains("providers.p2.api_key_secret")));
}

#[test]
fn validation_rejects_duplicate_provider_ids() {
    let toml = r#"
        [[providers]]
        id = "dup"
        vendor = "v1"
        kind = "subprocess"
        command = "a"

        [[providers]]
        id = "dup"
        vendor = "v2"
        kind = "subprocess"
        command = "b"
    "#;
    let config = Config::from_toml(toml).unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.to_string().contains("duplicate provider id")));
}

#[test]
fn validation_rejects_unknown_capability() {
    let toml = r#"
        [[providers]]
        id = "p1"
        vendor = "v1"
        kind = "subprocess"
        command = "a"
        capabilities = ["telepathy"]

        [[providers]]
        id = "p2"
        vendor = "v2"
        kind = "subprocess"
        command = "b"
    "#;
    let config = Config::from_toml(toml).unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.to_string().contains("telepathy")));
}

#[test]
fn load_reports_missing_file() {
    let err = Config::load("/definitely/not/here/config.toml").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn load_applies_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, two_valid_providers()).unwrap();

    std::env::set_var("WALLBOUNCE_CONSENSUS__CONFIDENCE_FLOOR", "0.85");
    let config = Config::load(path.to_str().unwrap()).unwrap();
    std::env::remove_var("WALLBOUNCE_CONSENSUS__CONFIDENCE_FLOOR");

    assert!((config.consensus.confidence_floor - 0.85).abs() < f64::EPSILON);
}

#[test]
fn bad_env_override_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, two_valid_providers()).unwrap();

    std::env::set_var("WALLBOUNCE_EVENTS__BUFFER_SIZE", "plenty");
    let err = Config::load(path.to_str().unwrap()).unwrap_err();
    std::env::remove_var("WALLBOUNCE_EVENTS__BUFFER_SIZE");

    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}
