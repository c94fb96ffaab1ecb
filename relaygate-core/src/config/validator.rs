//! Configuration validation rules

use super::env::referenced_env_vars;
use super::error::ValidationError;
use super::schema::{GatewayConfig, StrategyMode, Target};
use crate::providers::conditional::ConditionalRouter;
use std::collections::HashSet;

/// Maximum retries a target may request
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Validates a parsed [`GatewayConfig`]
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        if config.targets.is_empty() {
            return Err(ValidationError::missing("targets")
                .with_hint("at least one target must be configured"));
        }

        let mut seen_names = HashSet::new();
        for (i, target) in config.targets.iter().enumerate() {
            if let Some(name) = &target.name {
                if !seen_names.insert(name.as_str()) {
                    return Err(ValidationError::duplicate_name(
                        format!("targets[{}].name", i),
                        name.clone(),
                    ));
                }
            }
            self.validate_target(target, &format!("targets[{}]", i))?;
        }

        for (i, code) in config.strategy.on_status_codes.iter().enumerate() {
            validate_status_code(*code, &format!("strategy.on_status_codes[{}]", i))?;
        }

        match config.strategy.mode {
            StrategyMode::Loadbalance => self.validate_weights(config)?,
            StrategyMode::Conditional => self.validate_conditions(config)?,
            StrategyMode::Single | StrategyMode::Fallback => {}
        }

        Ok(())
    }

    fn validate_target(&self, target: &Target, path: &str) -> Result<(), ValidationError> {
        if target.provider.is_empty() {
            return Err(ValidationError::missing(format!("{}.provider", path)));
        }

        if let Some(key) = &target.api_key {
            if let Some(var) = referenced_env_vars(key.expose_secret()).first() {
                return Err(ValidationError::malformed(
                    format!("{}.api_key", path),
                    format!("unresolved environment variable '{}'", var),
                ));
            }
        }

        if let Some(host) = &target.custom_host {
            match url::Url::parse(host) {
                Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
                Ok(url) => {
                    return Err(ValidationError::unsupported_url(
                        format!("{}.custom_host", path),
                        format!("scheme is {}", url.scheme()),
                    ))
                }
                Err(e) => {
                    return Err(ValidationError::unsupported_url(
                        format!("{}.custom_host", path),
                        e.to_string(),
                    ))
                }
            }
        }

        if target.retry.attempts > MAX_RETRY_ATTEMPTS {
            return Err(ValidationError::out_of_range(
                format!("{}.retry.attempts", path),
                format!("must be at most {}", MAX_RETRY_ATTEMPTS),
            ));
        }
        for (i, code) in target.retry.on_status_codes.iter().enumerate() {
            validate_status_code(*code, &format!("{}.retry.on_status_codes[{}]", path, i))?;
        }

        if let Some(weight) = target.weight {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.weight", path),
                    "must be a finite, non-negative number",
                ));
            }
        }

        if target.request_timeout_ms == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{}.request_timeout_ms", path),
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    fn validate_weights(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        let total: f64 = config.targets.iter().map(Target::effective_weight).sum();
        if total <= 0.0 {
            return Err(ValidationError::out_of_range(
                "targets",
                "load-balance weights must sum to a positive number",
            ));
        }
        Ok(())
    }

    fn validate_conditions(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        let strategy = &config.strategy;
        if strategy.conditions.is_empty() {
            return Err(ValidationError::missing("strategy.conditions")
                .with_hint("conditional routing needs at least one condition"));
        }

        for (i, rule) in strategy.conditions.iter().enumerate() {
            if config.target_by_name(&rule.then).is_none() {
                return Err(ValidationError::unknown_target(
                    format!("strategy.conditions[{}].then", i),
                    rule.then.clone(),
                ));
            }
            ConditionalRouter::check_query(&rule.query).map_err(|message| {
                ValidationError::malformed(format!("strategy.conditions[{}].query", i), message)
            })?;
        }

        if let Some(default) = &strategy.default {
            if config.target_by_name(default).is_none() {
                return Err(ValidationError::unknown_target("strategy.default", default.clone()));
            }
        }

        Ok(())
    }
}

fn validate_status_code(code: u16, path: &str) -> Result<(), ValidationError> {
    if !(100..=599).contains(&code) {
        return Err(ValidationError::out_of_range(
            path,
            format!("{} is not an HTTP status code", code),
        ));
    }
    Ok(())
}
