//! Conditional routing over request metadata and params
//!
//! A rule's `query` is a JSON object whose keys are dotted paths rooted at
//! `metadata.` or `params.`, or the logical operators `$and` / `$or`. A leaf is
//! either a literal (implicit `$eq`) or an object of comparison operators.
//! Resolution is a pure function of the config and the request.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::protocol::request::JsonMap;
use regex::Regex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use tracing::debug;

const COMPARISON_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$regex", "$exists",
];

/// Resolves a conditional strategy to exactly one target
pub struct ConditionalRouter<'a> {
    config: &'a GatewayConfig,
}

impl<'a> ConditionalRouter<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        Self { config }
    }

    /// Check a rule's shape without evaluating it
    pub fn check_query(query: &JsonMap) -> Result<(), String> {
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        for (key, value) in query {
            match key.as_str() {
                "$and" | "$or" => {
                    let clauses = value
                        .as_array()
                        .filter(|a| !a.is_empty())
                        .ok_or_else(|| format!("{} expects a non-empty array", key))?;
                    for clause in clauses {
                        let clause = clause
                            .as_object()
                            .ok_or_else(|| format!("{} entries must be objects", key))?;
                        Self::check_query(clause)?;
                    }
                }
                path if path.starts_with("metadata.") || path.starts_with("params.") => {
                    check_leaf(path, value)?;
                }
                other => {
                    return Err(format!(
                        "'{}' must start with 'metadata.' or 'params.', or be $and/$or",
                        other
                    ))
                }
            }
        }
        Ok(())
    }

    /// Pick the target index for a request.
    ///
    /// Every matching rule must name the same target; with none matching the
    /// strategy's `default` is used.
    pub fn resolve(&self, params: &JsonMap) -> Result<usize, GatewayError> {
        let context = json!({
            "metadata": Value::Object(self.config.metadata.clone()),
            "params": Value::Object(params.clone()),
        });

        let mut selected: Option<&str> = None;
        for rule in &self.config.strategy.conditions {
            if !evaluate(&rule.query, &context).map_err(GatewayError::Routing)? {
                continue;
            }
            match selected {
                None => selected = Some(rule.then.as_str()),
                Some(previous) if previous == rule.then => {}
                Some(previous) => {
                    return Err(GatewayError::Routing(format!(
                        "ambiguous conditional routing: rules select both '{}' and '{}'",
                        previous, rule.then
                    )))
                }
            }
        }

        let name = match (selected, self.config.strategy.default.as_deref()) {
            (Some(name), _) => name,
            (None, Some(default)) => {
                debug!("No condition matched, using default target '{}'", default);
                default
            }
            (None, None) => {
                return Err(GatewayError::Routing(
                    "no conditional routing rule matched and no default target is set".to_string(),
                ))
            }
        };

        self.config
            .target_by_name(name)
            .map(|(index, _)| index)
            .ok_or_else(|| {
                GatewayError::Routing(format!("conditional routing selected unknown target '{}'", name))
            })
    }
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn check_leaf(path: &str, value: &Value) -> Result<(), String> {
    if !is_operator_object(value) {
        return Ok(());
    }
    let Some(operators) = value.as_object() else {
        return Ok(());
    };
    for (op, operand) in operators {
        if !COMPARISON_OPERATORS.contains(&op.as_str()) {
            return Err(format!("unknown operator '{}' on '{}'", op, path));
        }
        match op.as_str() {
            "$in" | "$nin" if !operand.is_array() => {
                return Err(format!("{} on '{}' expects an array", op, path))
            }
            "$exists" if !operand.is_boolean() => {
                return Err(format!("$exists on '{}' expects a boolean", path))
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| format!("$regex on '{}' expects a string", path))?;
                Regex::new(pattern).map_err(|e| format!("invalid $regex on '{}': {}", path, e))?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn evaluate(query: &JsonMap, context: &Value) -> Result<bool, String> {
    for (key, value) in query {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in value.as_array().into_iter().flatten() {
                    if !evaluate(clause.as_object().unwrap_or(&JsonMap::new()), context)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in value.as_array().into_iter().flatten() {
                    if evaluate(clause.as_object().unwrap_or(&JsonMap::new()), context)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            path => match_leaf(lookup(context, path), value)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn lookup<'v>(context: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn match_leaf(actual: Option<&Value>, expected: &Value) -> Result<bool, String> {
    if !is_operator_object(expected) {
        return Ok(actual.is_some_and(|a| values_equal(a, expected)));
    }
    let Some(operators) = expected.as_object() else {
        return Ok(false);
    };
    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => actual.is_some_and(|a| values_equal(a, operand)),
            "$ne" => !actual.is_some_and(|a| values_equal(a, operand)),
            "$gt" => compare(actual, operand) == Some(Ordering::Greater),
            "$gte" => matches!(compare(actual, operand), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(actual, operand) == Some(Ordering::Less),
            "$lte" => matches!(compare(actual, operand), Some(Ordering::Less | Ordering::Equal)),
            "$in" => actual.is_some_and(|a| contains(operand, a)),
            "$nin" => !actual.is_some_and(|a| contains(operand, a)),
            "$exists" => operand.as_bool().unwrap_or(true) == actual.is_some(),
            "$regex" => {
                let pattern = operand.as_str().unwrap_or_default();
                let re = Regex::new(pattern).map_err(|e| format!("invalid $regex: {}", e))?;
                actual.and_then(Value::as_str).is_some_and(|s| re.is_match(s))
            }
            other => return Err(format!("unknown operator '{}'", other)),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn contains(list: &Value, item: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|v| values_equal(v, item)))
}

fn compare(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
