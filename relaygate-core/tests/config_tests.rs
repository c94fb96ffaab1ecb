//! Integration tests for configuration loading and validation

use relaygate_core::config::{
    from_json_str, load_from_json, load_from_yaml, CacheMode, ConfigError, StrategyMode,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a test config file
fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_valid_yaml_config() {
    std::env::set_var("RELAYGATE_TEST_OPENAI_KEY", "sk-from-env");

    let yaml = r#"
strategy:
  mode: fallback
  on_status_codes: [429, 503]
targets:
  - provider: openai
    name: primary
    api_key: ${RELAYGATE_TEST_OPENAI_KEY}
    model: gpt-4o
    temperature: 0.4
    retry:
      attempts: 2
      use_retry_after_header: true
    cache:
      mode: simple
      max_age_secs: 60
  - provider: anthropic
    name: backup
    api_key: sk-ant-inline
    max_tokens: 1024
    request_timeout_ms: 30000
metadata:
  team: search
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "gateway.yaml", yaml);
    let config = load_from_yaml(&path).unwrap();

    assert_eq!(config.strategy.mode, StrategyMode::Fallback);
    assert_eq!(config.strategy.on_status_codes, vec![429, 503]);
    assert_eq!(config.targets.len(), 2);

    let primary = &config.targets[0];
    assert_eq!(primary.api_key.as_ref().unwrap().expose_secret(), "sk-from-env");
    assert_eq!(primary.retry.attempts, 2);
    assert!(primary.retry.use_retry_after_header);
    assert_eq!(primary.retry.on_status_codes, vec![429, 500, 502, 503, 504]);
    assert_eq!(primary.cache.mode, CacheMode::Simple);
    assert_eq!(primary.cache.max_age_secs, Some(60));

    let backup = &config.targets[1];
    assert_eq!(backup.max_tokens, Some(1024));
    assert_eq!(backup.request_timeout_ms, Some(30000));
    assert_eq!(config.metadata["team"], "search");
}

#[test]
fn test_load_valid_json_config() {
    let json = r#"{
        "strategy": {"mode": "loadbalance"},
        "targets": [
            {"provider": "openai", "weight": 3},
            {"provider": "groq", "weight": 1}
        ]
    }"#;
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "gateway.json", json);
    let config = load_from_json(&path).unwrap();
    assert_eq!(config.strategy.mode, StrategyMode::Loadbalance);
    assert_eq!(config.targets[0].effective_weight(), 3.0);
}

#[test]
fn test_missing_env_var_reported() {
    let yaml = "targets:\n  - provider: openai\n    api_key: ${RELAYGATE_TEST_DEFINITELY_UNSET}\n";
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "gateway.yaml", yaml);
    match load_from_yaml(&path) {
        Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "RELAYGATE_TEST_DEFINITELY_UNSET"),
        other => panic!("expected EnvVarNotFound, got {:?}", other),
    }
}

#[test]
fn test_yaml_parse_error_has_location() {
    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "broken.yaml", "targets:\n  - provider: [unclosed\n");
    match load_from_yaml(&path) {
        Err(ConfigError::ParseError { line, .. }) => assert!(line.is_some()),
        other => panic!("expected ParseError, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = load_from_yaml(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::IoError { .. })));
}

#[test]
fn test_validation_failures() {
    let cases = [
        r#"{"targets": []}"#,
        r#"{"targets": [{"provider": "openai", "retry": {"attempts": 9}}]}"#,
        r#"{"targets": [{"provider": "openai", "custom_host": "ftp://example.com"}]}"#,
        r#"{"targets": [{"provider": "openai", "name": "a"}, {"provider": "openai", "name": "a"}]}"#,
        r#"{"strategy": {"mode": "conditional", "conditions": [{"query": {"metadata.x": 1}, "then": "missing"}]},
            "targets": [{"provider": "openai", "name": "a"}]}"#,
        r#"{"strategy": {"mode": "loadbalance"}, "targets": [{"provider": "openai", "weight": 0}]}"#,
    ];
    for case in cases {
        let result = from_json_str(case);
        assert!(
            matches!(result, Err(ConfigError::ValidationError(_))),
            "expected validation error for {}, got {:?}",
            case,
            result
        );
    }
}

#[test]
fn test_api_key_redacted_in_debug() {
    let config = from_json_str(r#"{"targets": [{"provider": "openai", "api_key": "sk-live-secret"}]}"#).unwrap();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("sk-live-secret"));
}
