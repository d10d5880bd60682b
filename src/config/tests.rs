//! Configuration tests
//!
//! The template written by `to_toml()` must parse back into `FileConfig` and
//! resolve to the same values, so a field added to `Config` but forgotten in
//! the template shows up here.

use super::*;
use std::collections::HashMap;

fn no_env(_: &str) -> Option<String> {
    None
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_roundtrip_default() {
    let config = Config::default();
    let toml_str = config.to_toml();

    let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );

    let resolved = Config::resolve(parsed.unwrap(), no_env).unwrap();
    assert_eq!(resolved.bind_addr, config.bind_addr);
    assert_eq!(resolved.route_prefix, config.route_prefix);
    assert_eq!(resolved.log_dir, config.log_dir);
    assert_eq!(resolved.body_limit_bytes, config.body_limit_bytes);
    assert_eq!(resolved.upstream.url, config.upstream.url);
    assert_eq!(resolved.upstream.model, config.upstream.model);
    assert_eq!(resolved.supervisor.workers, config.supervisor.workers);
    assert_eq!(resolved.supervisor.backoff, config.supervisor.backoff);
    assert_eq!(resolved.logging.file_rotation, config.logging.file_rotation);
}

#[test]
fn test_template_never_contains_credential() {
    let mut config = Config::default();
    config.upstream.api_key = Some("sk-secret".to_string());

    assert!(!config.to_toml().contains("sk-secret"));
    assert!(!format!("{:?}", config).contains("sk-secret"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    let file: FileConfig = toml::from_str(
        r#"
bind_addr = "0.0.0.0:7000"
route_prefix = "/from-file"

[upstream]
model = "file-model"
api_key = "file-key"
"#,
    )
    .unwrap();

    let env = env_from(&[
        ("DSV3_BIND", "127.0.0.1:7100"),
        ("DSV3_MODEL", "env-model"),
        ("SILICONFLOW_KEY", "env-key"),
    ]);
    let config = Config::resolve(file, env).unwrap();

    assert_eq!(config.bind_addr.port(), 7100);
    assert_eq!(config.route_prefix, "/from-file");
    assert_eq!(config.upstream.model, "env-model");
    assert_eq!(config.upstream.api_key.as_deref(), Some("env-key"));
}

#[test]
fn test_blank_fallback_key_is_no_key() {
    let env = env_from(&[("SILICONFLOW_KEY", "   ")]);
    let config = Config::resolve(FileConfig::default(), env).unwrap();
    assert!(config.upstream.api_key.is_none());
}

#[test]
fn test_invalid_bind_is_an_error() {
    let env = env_from(&[("DSV3_BIND", "not-an-address")]);
    assert!(Config::resolve(FileConfig::default(), env).is_err());
}

#[test]
fn test_invalid_workers_is_an_error() {
    let env = env_from(&[("DSV3_WORKERS", "many")]);
    assert!(Config::resolve(FileConfig::default(), env).is_err());
}

#[test]
fn test_zero_workers_falls_back_to_cores() {
    let env = env_from(&[("DSV3_WORKERS", "0")]);
    let config = Config::resolve(FileConfig::default(), env).unwrap();
    assert_eq!(config.supervisor.workers, available_cores());
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived values
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_production_hides_client_asset() {
    let config =
        Config::resolve(FileConfig::default(), env_from(&[("DSV3_ENV", "production")])).unwrap();
    assert!(!config.serve_client);

    let config = Config::resolve(FileConfig::default(), no_env).unwrap();
    assert!(config.serve_client);
}

#[test]
fn test_file_serve_client_wins_over_environment() {
    let file: FileConfig = toml::from_str("serve_client = true").unwrap();
    let config = Config::resolve(file, env_from(&[("DSV3_ENV", "production")])).unwrap();
    assert!(config.serve_client);
}

#[test]
fn test_route_prefix_normalization() {
    assert_eq!(normalize_prefix("api/chat/"), "/api/chat");
    assert_eq!(normalize_prefix("/api/chat"), "/api/chat");
    assert_eq!(normalize_prefix("/"), "/");
    assert_eq!(normalize_prefix(""), "/");
}

#[test]
fn test_backoff_and_rotation_parsing() {
    assert_eq!(BackoffKind::parse("none"), BackoffKind::Immediate);
    assert_eq!(BackoffKind::parse("Fixed"), BackoffKind::Fixed);
    assert_eq!(BackoffKind::parse("whatever"), BackoffKind::Exponential);
    assert_eq!(LogRotation::parse("HOURLY"), LogRotation::Hourly);
    assert_eq!(LogRotation::parse("weekly"), LogRotation::Daily);
}

#[test]
fn test_logging_section_falls_back_on_unknown_values() {
    let file: FileConfig = toml::from_str(
        r#"
[logging]
level = "LOUD"
file_rotation = " Never "
file_prefix = ""
"#,
    )
    .unwrap();
    let config = Config::resolve(file, no_env).unwrap();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_rotation, LogRotation::Never);
    assert_eq!(config.logging.file_prefix, "dsv3-relay");

    let file: FileConfig = toml::from_str("[logging]\nlevel = \"DEBUG\"").unwrap();
    let config = Config::resolve(file, no_env).unwrap();
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_template_leaves_worker_count_unset() {
    let file: FileConfig = toml::from_str(&Config::default().to_toml()).unwrap();
    let supervisor = file.supervisor.unwrap();
    assert_eq!(supervisor.workers, None);

    // A plain start after the template was written still follows the cores
    let file: FileConfig = toml::from_str(&Config::default().to_toml()).unwrap();
    let config = Config::resolve(file, no_env).unwrap();
    assert_eq!(config.supervisor.workers, available_cores());
}
