//! Model capability tables
//!
//! Each adapter may publish which hyperparameters its models accept and within
//! what bounds. Target-level defaults are checked against the table before they
//! are merged into a request: unsupported parameters are dropped and numeric
//! values are clamped into range.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Parameter support with min/max bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSupport<T> {
    pub supported: bool,
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Default for ParameterSupport<T> {
    fn default() -> Self {
        Self {
            supported: false,
            min: None,
            max: None,
        }
    }
}

impl ParameterSupport<f64> {
    pub fn unsupported() -> Self {
        Self::default()
    }

    pub fn supported() -> Self {
        Self {
            supported: true,
            min: None,
            max: None,
        }
    }

    pub fn bounded(min: f64, max: f64) -> Self {
        Self {
            supported: true,
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Hyperparameters governed by a capability table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlParameters {
    pub temperature: ParameterSupport<f64>,
    pub top_p: ParameterSupport<f64>,
    pub max_tokens: ParameterSupport<f64>,
    pub presence_penalty: ParameterSupport<f64>,
    pub frequency_penalty: ParameterSupport<f64>,
    pub stop: ParameterSupport<f64>,
    pub seed: ParameterSupport<f64>,
    pub reasoning_effort: ParameterSupport<f64>,
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            temperature: ParameterSupport::bounded(0.0, 2.0),
            top_p: ParameterSupport::bounded(0.0, 1.0),
            max_tokens: ParameterSupport {
                supported: true,
                min: Some(1.0),
                max: None,
            },
            presence_penalty: ParameterSupport::bounded(-2.0, 2.0),
            frequency_penalty: ParameterSupport::bounded(-2.0, 2.0),
            stop: ParameterSupport::supported(),
            seed: ParameterSupport::supported(),
            reasoning_effort: ParameterSupport::unsupported(),
        }
    }
}

impl ControlParameters {
    /// Support entry for a canonical field; `None` if the table does not govern it
    pub fn get(&self, field: &str) -> Option<&ParameterSupport<f64>> {
        match field {
            "temperature" => Some(&self.temperature),
            "top_p" => Some(&self.top_p),
            "max_tokens" => Some(&self.max_tokens),
            "presence_penalty" => Some(&self.presence_penalty),
            "frequency_penalty" => Some(&self.frequency_penalty),
            "stop" => Some(&self.stop),
            "seed" => Some(&self.seed),
            "reasoning_effort" => Some(&self.reasoning_effort),
            _ => None,
        }
    }
}

/// Capabilities of the models matching a name prefix
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCapabilities {
    /// Model name prefix, e.g. `o1` or `claude-3`; empty matches every model
    pub model_prefix: String,
    pub parameters: ControlParameters,
}

impl ModelCapabilities {
    pub fn builder(model_prefix: impl Into<String>) -> ModelCapabilitiesBuilder {
        ModelCapabilitiesBuilder {
            capabilities: ModelCapabilities {
                model_prefix: model_prefix.into(),
                parameters: ControlParameters::default(),
            },
        }
    }
}

/// Builder for constructing model capabilities
pub struct ModelCapabilitiesBuilder {
    capabilities: ModelCapabilities,
}

impl ModelCapabilitiesBuilder {
    pub fn temperature(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.temperature = support;
        self
    }

    pub fn top_p(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.top_p = support;
        self
    }

    pub fn max_tokens(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.max_tokens = support;
        self
    }

    pub fn penalties(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.presence_penalty = support.clone();
        self.capabilities.parameters.frequency_penalty = support;
        self
    }

    pub fn seed(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.seed = support;
        self
    }

    pub fn reasoning_effort(mut self, support: ParameterSupport<f64>) -> Self {
        self.capabilities.parameters.reasoning_effort = support;
        self
    }

    pub fn build(self) -> ModelCapabilities {
        self.capabilities
    }
}

/// Outcome of checking one configured value against the table
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDecision {
    Keep(Value),
    Clamped { original: Value, value: Value },
    Drop,
}

/// Per-provider table, searched by longest matching model prefix
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilityTable {
    models: Vec<ModelCapabilities>,
}

impl CapabilityTable {
    pub fn new(models: Vec<ModelCapabilities>) -> Self {
        Self { models }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelCapabilities> {
        self.models
            .iter()
            .filter(|m| model.starts_with(&m.model_prefix))
            .max_by_key(|m| m.model_prefix.len())
    }

    /// Check `value` for `field` on `model`.
    ///
    /// Fields the table does not govern, and models it does not list, are kept
    /// unchanged. Numeric values outside the bounds are always clamped.
    pub fn check(&self, model: &str, field: &str, value: &Value) -> ParamDecision {
        let Some(support) = self
            .lookup(model)
            .and_then(|caps| caps.parameters.get(field))
        else {
            return ParamDecision::Keep(value.clone());
        };

        if !support.supported {
            return ParamDecision::Drop;
        }

        let Some(number) = value.as_f64() else {
            return ParamDecision::Keep(value.clone());
        };

        let mut clamped = number;
        if let Some(min) = support.min {
            clamped = clamped.max(min);
        }
        if let Some(max) = support.max {
            clamped = clamped.min(max);
        }

        if clamped == number {
            ParamDecision::Keep(value.clone())
        } else {
            ParamDecision::Clamped {
                original: value.clone(),
                value: same_kind(value, clamped),
            }
        }
    }
}

/// Keep integers integral after clamping
fn same_kind(original: &Value, clamped: f64) -> Value {
    if original.is_i64() || original.is_u64() {
        Value::from(clamped.round() as i64)
    } else {
        Number::from_f64(clamped)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
