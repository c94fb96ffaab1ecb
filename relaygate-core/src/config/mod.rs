//! Gateway configuration
//!
//! A [`GatewayConfig`] is parsed once per call and is immutable while the call
//! is processed. Loading interpolates `${ENV_VAR}` placeholders and then runs
//! the [`ConfigValidator`].

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::interpolate_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    CacheMode, CacheSettings, ConditionRule, GatewayConfig, HookConfig, HookKind,
    RetrySettings, StrategyConfig, StrategyMode, Target,
};
pub use secrets::{is_sensitive_name, redact_by_field_name, SafeLogging, SecretString};
pub use validator::{ConfigValidator, MAX_RETRY_ATTEMPTS};

use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    let interpolated = env::interpolate_env_vars(&content)?;

    let config: GatewayConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    finish(config)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    let interpolated = env::interpolate_env_vars(&content)?;
    parse_json(&interpolated, &path.to_string_lossy())
}

/// Parse a configuration passed inline, e.g. in a request header
pub fn from_json_str(content: &str) -> ConfigResult<GatewayConfig> {
    let interpolated = env::interpolate_env_vars(content)?;
    parse_json(&interpolated, "<inline>")
}

/// Build a configuration from an already-decoded JSON value
pub fn from_value(value: Value) -> ConfigResult<GatewayConfig> {
    let config: GatewayConfig =
        serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
            path: "<value>".to_string(),
            line: None,
            column: None,
            message: e.to_string(),
        })?;
    finish(config)
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

fn parse_json(content: &str, origin: &str) -> ConfigResult<GatewayConfig> {
    let config: GatewayConfig =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;
    finish(config)
}

fn finish(mut config: GatewayConfig) -> ConfigResult<GatewayConfig> {
    env::interpolate_config_env_vars(&mut config)?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_yaml_fallback_config() {
        let yaml = r#"
strategy:
  mode: fallback
  on_status_codes: [429]
targets:
  - provider: openai
    api_key: sk-test
    retry:
      attempts: 2
  - provider: anthropic
    api_key: sk-ant
    model: claude-3-5-sonnet-latest
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy.mode, StrategyMode::Fallback);
        assert_eq!(config.targets[0].retry.attempts, 2);
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_from_value_runs_validation() {
        let result = from_value(json!({"targets": []}));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_inline_json_reports_position() {
        match from_json_str("{\"targets\": [") {
            Err(ConfigError::ParseError { line, .. }) => assert_eq!(line, Some(1)),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
