//! Declarative parameter mapping from canonical bodies to provider bodies
//!
//! A [`ParameterConfig`] lists, per canonical field, where the value goes in the
//! provider body and how it is defaulted, bounded or derived. Fields that are
//! not listed are dropped. Building produces an ordered list of
//! `(path, value)` writes that is then applied to an empty object.

use crate::protocol::request::JsonMap;
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

/// Derives a provider value from the whole canonical body
pub type TransformFn = fn(&JsonMap) -> Option<Value>;

/// Errors raised while building a provider body
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("missing required parameter '{field}' (provider field '{provider_field}')")]
    MissingRequired {
        field: String,
        provider_field: String,
    },

    #[error("parameter '{field}' value {value} is outside [{}, {}]",
            .min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".into()),
            .max.map(|v| v.to_string()).unwrap_or_else(|| "inf".into()))]
    OutOfRange {
        field: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("cannot write '{path}': an ancestor is not an object")]
    PathConflict { path: String },
}

/// What to do with a numeric value outside its bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfRange {
    #[default]
    Clamp,
    Reject,
}

/// Mapping rule for one canonical field
#[derive(Clone)]
pub struct ParamSpec {
    /// Destination in the provider body; dots create nested objects
    pub provider_field: String,
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub out_of_range: OutOfRange,
    pub transform: Option<TransformFn>,
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("provider_field", &self.provider_field)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("out_of_range", &self.out_of_range)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl ParamSpec {
    pub fn new(provider_field: impl Into<String>) -> Self {
        Self {
            provider_field: provider_field.into(),
            required: false,
            default: None,
            min: None,
            max: None,
            out_of_range: OutOfRange::Clamp,
            transform: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Bound numeric values, clamping those outside the range
    pub fn clamp(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.out_of_range = OutOfRange::Clamp;
        self
    }

    /// Bound numeric values, rejecting those outside the range
    pub fn reject_outside(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self.out_of_range = OutOfRange::Reject;
        self
    }

    pub fn transform(mut self, transform: TransformFn) -> Self {
        self.transform = Some(transform);
        self
    }

    fn resolve(&self, field: &str, body: &JsonMap) -> Result<Option<Value>, BuildError> {
        let value = match self.transform {
            Some(transform) => transform(body),
            None => body.get(field).cloned(),
        }
        .filter(|v| !v.is_null())
        .or_else(|| self.default.clone());

        let Some(value) = value else {
            if self.required {
                return Err(BuildError::MissingRequired {
                    field: field.to_string(),
                    provider_field: self.provider_field.clone(),
                });
            }
            return Ok(None);
        };

        self.bound(field, value).map(Some)
    }

    fn bound(&self, field: &str, value: Value) -> Result<Value, BuildError> {
        let Some(number) = value.as_f64() else {
            return Ok(value);
        };
        let below = self.min.is_some_and(|min| number < min);
        let above = self.max.is_some_and(|max| number > max);
        if !below && !above {
            return Ok(value);
        }

        match self.out_of_range {
            OutOfRange::Reject => Err(BuildError::OutOfRange {
                field: field.to_string(),
                value: number,
                min: self.min,
                max: self.max,
            }),
            OutOfRange::Clamp => {
                let clamped = match (below, self.min, self.max) {
                    (true, Some(min), _) => min,
                    (_, _, Some(max)) => max,
                    _ => number,
                };
                if value.is_i64() || value.is_u64() {
                    Ok(Value::from(clamped.round() as i64))
                } else {
                    Ok(Number::from_f64(clamped).map(Value::Number).unwrap_or(value))
                }
            }
        }
    }
}

/// Ordered per-field mapping for one provider function
#[derive(Debug, Clone, Default)]
pub struct ParameterConfig {
    fields: Vec<(String, Vec<ParamSpec>)>,
}

impl ParameterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `field` to a provider field of the same name
    pub fn passthrough(self, field: &str) -> Self {
        self.field(field, ParamSpec::new(field))
    }

    /// Add a spec for `field`; a field may fan out to several specs
    pub fn field(mut self, field: &str, spec: ParamSpec) -> Self {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, specs)) => specs.push(spec),
            None => self.fields.push((field.to_string(), vec![spec])),
        }
        self
    }

    /// Replace every spec of `field`
    pub fn with(mut self, field: &str, spec: ParamSpec) -> Self {
        match self.fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, specs)) => *specs = vec![spec],
            None => self.fields.push((field.to_string(), vec![spec])),
        }
        self
    }

    /// Overlay `other`: its fields replace ours, new ones are appended
    pub fn extend(mut self, other: ParameterConfig) -> Self {
        for (field, specs) in other.fields {
            match self.fields.iter_mut().find(|(name, _)| *name == field) {
                Some((_, existing)) => *existing = specs,
                None => self.fields.push((field, specs)),
            }
        }
        self
    }

    pub fn exclude(mut self, fields: &[&str]) -> Self {
        self.fields.retain(|(name, _)| !fields.contains(&name.as_str()));
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|(name, _)| name == field)
    }

    /// Resolve every field into an ordered write list
    pub fn writes(&self, body: &JsonMap) -> Result<Vec<(String, Value)>, BuildError> {
        let mut writes = Vec::new();
        for (field, specs) in &self.fields {
            for spec in specs {
                if let Some(value) = spec.resolve(field, body)? {
                    writes.push((spec.provider_field.clone(), value));
                }
            }
        }
        Ok(writes)
    }

    /// Build the provider body from a canonical body
    pub fn build(&self, body: &JsonMap) -> Result<JsonMap, BuildError> {
        let mut out = JsonMap::new();
        for (path, value) in self.writes(body)? {
            set_path(&mut out, &path, value)?;
        }
        Ok(out)
    }
}

/// Write `value` at a dotted `path`, creating intermediate objects
pub fn set_path(target: &mut JsonMap, path: &str, value: Value) -> Result<(), BuildError> {
    let mut segments = path.split('.').peekable();
    let mut current = target;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return Ok(());
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(BuildError::PathConflict {
                    path: path.to_string(),
                })
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unlisted_fields_dropped() {
        let config = ParameterConfig::new().passthrough("model");
        let out = config
            .build(&body(json!({"model": "m", "logit_bias": {}})))
            .unwrap();
        assert_eq!(Value::Object(out), json!({"model": "m"}));
    }

    #[test]
    fn test_required_without_default_fails() {
        let config = ParameterConfig::new().field("max_tokens", ParamSpec::new("max_tokens").required());
        let err = config.build(&JsonMap::new()).unwrap_err();
        assert!(matches!(err, BuildError::MissingRequired { ref field, .. } if field == "max_tokens"));
    }

    #[test]
    fn test_default_fills_missing_and_null() {
        let config = ParameterConfig::new()
            .field("max_tokens", ParamSpec::new("max_tokens").required().default_value(64));
        let out = config.build(&body(json!({"max_tokens": null}))).unwrap();
        assert_eq!(out["max_tokens"], json!(64));
    }

    #[test]
    fn test_clamp_and_reject_policies() {
        let config = ParameterConfig::new()
            .field("temperature", ParamSpec::new("temperature").clamp(0.0, 1.0))
            .field("n", ParamSpec::new("n").reject_outside(Some(1.0), Some(1.0)));

        let out = config.build(&body(json!({"temperature": 1.7}))).unwrap();
        assert_eq!(out["temperature"], json!(1.0));

        let err = config.build(&body(json!({"n": 3}))).unwrap_err();
        assert!(matches!(err, BuildError::OutOfRange { value, .. } if value == 3.0));
    }

    #[test]
    fn test_dotted_paths_and_fan_in_transform() {
        fn thinking(body: &JsonMap) -> Option<Value> {
            body.get("reasoning_effort")
                .and_then(Value::as_str)
                .map(|e| json!(if e == "high" { 8192 } else { 1024 }))
        }
        let config = ParameterConfig::new()
            .field("stop", ParamSpec::new("generation.stop_sequences"))
            .field(
                "reasoning_effort",
                ParamSpec::new("thinking.budget_tokens").transform(thinking),
            );
        let out = config
            .build(&body(json!({"stop": ["x"], "reasoning_effort": "high"})))
            .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"generation": {"stop_sequences": ["x"]}, "thinking": {"budget_tokens": 8192}})
        );
    }

    #[test]
    fn test_extend_exclude_with() {
        let base = ParameterConfig::new()
            .passthrough("model")
            .passthrough("temperature")
            .passthrough("logprobs");
        let derived = base
            .extend(ParameterConfig::new().field("temperature", ParamSpec::new("temp")))
            .exclude(&["logprobs"])
            .with("model", ParamSpec::new("model").default_value("small"));

        assert!(!derived.contains("logprobs"));
        let out = derived.build(&body(json!({"temperature": 0.5}))).unwrap();
        assert_eq!(Value::Object(out), json!({"model": "small", "temp": 0.5}));
    }

    #[test]
    fn test_path_conflict_reported() {
        let mut target = body(json!({"a": 1}));
        let err = set_path(&mut target, "a.b", json!(2)).unwrap_err();
        assert_eq!(err, BuildError::PathConflict { path: "a.b".into() });
    }
}
