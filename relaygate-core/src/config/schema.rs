//! Configuration schema structures with serde support

use super::secrets::{SafeLogging, SecretString};
use crate::protocol::request::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-call gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// How targets are selected
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Dispatch destinations, in order
    pub targets: Vec<Target>,

    /// Params forced onto every provider body (after target defaults)
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub override_params: JsonMap,

    /// Hooks to run around each dispatch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookConfig>,

    /// Caller metadata, visible to conditional routing as `metadata.*`
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,

    /// Drop provider-specific extensions from stream chunks
    #[serde(default)]
    pub strict_open_ai_compliance: bool,

    /// Overall deadline across every target and retry, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// Strategy selection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    #[serde(default)]
    pub mode: StrategyMode,

    /// Fallback: statuses that move on to the next target even when ok
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_status_codes: Vec<u16>,

    /// Conditional: rules evaluated over `metadata` and `params`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionRule>,

    /// Conditional: target name used when no rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    #[default]
    Single,
    Fallback,
    Loadbalance,
    Conditional,
}

/// One conditional routing rule
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionRule {
    pub query: JsonMap,
    /// Name of the target selected when `query` matches
    pub then: String,
}

/// A fully configured dispatch destination
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// Registered provider id (e.g. "openai")
    pub provider: String,

    /// Name referenced by conditional rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// API key (supports environment variable interpolation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    /// Replaces the provider's default base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Load-balance weight; missing means 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Params forced onto this target's body, applied last
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub override_params: JsonMap,
}

/// Response cache settings for a target
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub mode: CacheMode,

    /// Entry lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Disabled,
    Simple,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Retries after the first call
    #[serde(default)]
    pub attempts: u32,

    #[serde(default = "default_retry_status_codes")]
    pub on_status_codes: Vec<u16>,

    /// Honor `Retry-After` / `retry-after-ms` response headers
    #[serde(default)]
    pub use_retry_after_header: bool,

    /// Fixed wait between attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 0,
            on_status_codes: default_retry_status_codes(),
            use_retry_after_header: false,
            delay_ms: default_retry_delay(),
        }
    }
}

/// Which side of the dispatch a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Input,
    Output,
}

/// A hook referenced by name and resolved by the hook pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    pub name: String,
    pub kind: HookKind,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub options: JsonMap,
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_retry_delay() -> u64 {
    1000
}

impl GatewayConfig {
    /// A single-target config
    pub fn single(target: Target) -> Self {
        Self {
            strategy: StrategyConfig::default(),
            targets: vec![target],
            override_params: JsonMap::new(),
            hooks: Vec::new(),
            metadata: JsonMap::new(),
            strict_open_ai_compliance: false,
            deadline_ms: None,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn target_by_name(&self, name: &str) -> Option<(usize, &Target)> {
        self.targets
            .iter()
            .enumerate()
            .find(|(_, t)| t.name.as_deref() == Some(name))
    }
}

impl StrategyConfig {
    pub fn new(mode: StrategyMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_on_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.on_status_codes = codes;
        self
    }
}

impl Target {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key));
        self
    }

    pub fn with_custom_host(mut self, host: impl Into<String>) -> Self {
        self.custom_host = Some(host.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_cache(mut self, mode: CacheMode) -> Self {
        self.cache.mode = mode;
        self
    }

    /// Configured hyperparameters, as canonical `(field, value)` pairs
    pub fn hyperparameters(&self) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        if let Some(v) = &self.model {
            out.push(("model", Value::from(v.as_str())));
        }
        if let Some(v) = self.temperature {
            out.push(("temperature", Value::from(v)));
        }
        if let Some(v) = self.max_tokens {
            out.push(("max_tokens", Value::from(v)));
        }
        if let Some(v) = self.top_p {
            out.push(("top_p", Value::from(v)));
        }
        if let Some(v) = self.presence_penalty {
            out.push(("presence_penalty", Value::from(v)));
        }
        if let Some(v) = self.frequency_penalty {
            out.push(("frequency_penalty", Value::from(v)));
        }
        if let Some(v) = &self.stop {
            out.push(("stop", v.clone()));
        }
        if let Some(v) = self.seed {
            out.push(("seed", Value::from(v)));
        }
        if let Some(v) = &self.reasoning_effort {
            out.push(("reasoning_effort", Value::from(v.as_str())));
        }
        out
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }

    /// Label used in logs and routing errors
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider)
    }
}

impl SafeLogging for Target {
    fn safe_for_logging(&self) -> String {
        let key = self
            .api_key
            .as_ref()
            .map(|k| k.partial_redact())
            .unwrap_or_else(|| "[NONE]".to_string());
        format!(
            "provider={} name={} model={} api_key={}",
            self.provider,
            self.name.as_deref().unwrap_or("-"),
            self.model.as_deref().unwrap_or("-"),
            key
        )
    }
}

impl RetrySettings {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn with_on_status_codes(mut self, codes: Vec<u16>) -> Self {
        self.on_status_codes = codes;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_retry_after_header(mut self, enabled: bool) -> Self {
        self.use_retry_after_header = enabled;
        self
    }
}
