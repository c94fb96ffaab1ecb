//! Environment variable interpolation for configuration

use super::error::ConfigError;
use super::schema::GatewayConfig;
use super::secrets::SecretString;
use regex::Regex;
use std::env;

const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

fn env_var_pattern() -> Result<Regex, ConfigError> {
    Ok(Regex::new(ENV_VAR_PATTERN)?)
}

/// Interpolate `${VAR}` placeholders in raw configuration text.
///
/// Every placeholder must resolve; the first missing variable is reported.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = env_var_pattern()?;
    let mut missing = None;
    let result = pattern.replace_all(content, |cap: &regex::Captures<'_>| {
        match env::var(&cap[1]) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::EnvVarNotFound { var }),
        None => Ok(result.into_owned()),
    }
}

/// Interpolate the fields of an already-parsed config that may hold placeholders
pub fn interpolate_config_env_vars(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    for target in &mut config.targets {
        if let Some(key) = &target.api_key {
            let interpolated = interpolate_env_vars(key.expose_secret())?;
            target.api_key = Some(SecretString::new(interpolated));
        }
        if let Some(host) = &target.custom_host {
            target.custom_host = Some(interpolate_env_vars(host)?);
        }
    }
    Ok(())
}

/// Names of the variables referenced in `text`
pub fn referenced_env_vars(text: &str) -> Vec<String> {
    match env_var_pattern() {
        Ok(pattern) => pattern
            .captures_iter(text)
            .map(|cap| cap[1].to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("RELAYGATE_TEST_VAR", "test_value");

        let result = interpolate_env_vars("api_key: ${RELAYGATE_TEST_VAR}").unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("RELAYGATE_TEST_VAR");
    }

    #[test]
    fn test_missing_env_var() {
        let result = interpolate_env_vars("api_key: ${RELAYGATE_MISSING_VAR}");
        match result {
            Err(ConfigError::EnvVarNotFound { var }) => assert_eq!(var, "RELAYGATE_MISSING_VAR"),
            other => panic!("expected EnvVarNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_parsed_config_secrets_interpolated() {
        env::set_var("RELAYGATE_TEST_KEY", "sk-from-env");
        let mut config =
            GatewayConfig::single(Target::new("openai").with_api_key("${RELAYGATE_TEST_KEY}"));
        interpolate_config_env_vars(&mut config).unwrap();
        let key = config.targets[0].api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "sk-from-env");
        env::remove_var("RELAYGATE_TEST_KEY");
    }

    #[test]
    fn test_referenced_env_vars() {
        let vars = referenced_env_vars("a: ${OPENAI_API_KEY}, b: ${API_BASE_URL}");
        assert_eq!(vars, vec!["OPENAI_API_KEY", "API_BASE_URL"]);
    }
}
