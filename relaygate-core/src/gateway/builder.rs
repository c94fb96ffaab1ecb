//! Per-target request building
//!
//! Produces the canonical body a target actually receives and then the
//! provider body. Merge precedence, lowest first:
//!
//! 1. the caller's body
//! 2. the target's hyperparameters, checked against the adapter's capability table
//! 3. the config's `override_params`
//! 4. the target's `override_params`

use crate::config::{GatewayConfig, Target};
use crate::capabilities::ParamDecision;
use crate::protocol::request::{CanonicalRequest, JsonMap, RequestBody};
use crate::providers::adapter::ProviderAdapter;
use crate::providers::params::BuildError;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Name of the tool structured output is requested through
pub const STRUCTURED_OUTPUT_TOOL: &str = "structured_output";

pub struct RequestBuilder<'a> {
    adapter: &'a dyn ProviderAdapter,
    config: &'a GatewayConfig,
    target: &'a Target,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(adapter: &'a dyn ProviderAdapter, config: &'a GatewayConfig, target: &'a Target) -> Self {
        Self {
            adapter,
            config,
            target,
        }
    }

    /// The canonical request as this target sees it
    pub fn prepare(&self, request: &CanonicalRequest) -> CanonicalRequest {
        let mut prepared = request.clone();
        let RequestBody::Json(body) = &mut prepared.body else {
            return prepared;
        };

        for (field, value) in self.defaults(body) {
            body.insert(field.to_string(), value);
        }
        for (field, value) in self.config.override_params.iter().chain(&self.target.override_params) {
            body.insert(field.clone(), value.clone());
        }

        if request.function.is_chat_capable() {
            if let Some(prompt) = &self.target.system_prompt {
                set_system_prompt(body, prompt);
            }
            if let Some(schema) = json_schema(body) {
                append_instructions(body, &schema_instructions(&schema));
                add_structured_output_tool(body, schema);
            }
        }
        prepared
    }

    /// Target hyperparameters that survive the capability check
    fn defaults(&self, body: &JsonMap) -> Vec<(&'static str, Value)> {
        let hyper = self.target.hyperparameters();
        let Some(table) = self.adapter.capabilities() else {
            return hyper;
        };

        let model = self
            .target
            .model
            .clone()
            .or_else(|| body.get("model").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        hyper
            .into_iter()
            .filter_map(|(field, value)| match table.check(&model, field, &value) {
                ParamDecision::Keep(v) => Some((field, v)),
                ParamDecision::Clamped { original, value } => {
                    info!(
                        "Clamped {} from {} to {} for {} model {}",
                        field,
                        original,
                        value,
                        self.adapter.id(),
                        model
                    );
                    Some((field, value))
                }
                ParamDecision::Drop => {
                    info!(
                        "Dropped {} for {} model {}: not supported",
                        field,
                        self.adapter.id(),
                        model
                    );
                    None
                }
            })
            .collect()
    }

    /// Map the prepared canonical body onto the provider's body
    pub fn provider_body(&self, prepared: &CanonicalRequest) -> Result<RequestBody, BuildError> {
        match (&prepared.body, self.adapter.parameter_config(prepared.function)) {
            (RequestBody::Json(body), Some(config)) => {
                let built = config.build(body)?;
                debug!(
                    "Built {} body for {} with {} fields",
                    prepared.function,
                    self.adapter.id(),
                    built.len()
                );
                Ok(RequestBody::Json(built))
            }
            (body, _) => Ok(body.clone()),
        }
    }
}

fn set_system_prompt(body: &mut JsonMap, prompt: &str) {
    let Some(messages) = messages_mut(body) else {
        return;
    };
    match messages.iter_mut().find(|m| is_instruction(m)) {
        Some(existing) => existing["content"] = Value::String(prompt.to_string()),
        None => messages.insert(0, json!({"role": "system", "content": prompt})),
    }
}

fn append_instructions(body: &mut JsonMap, instructions: &str) {
    let Some(messages) = messages_mut(body) else {
        return;
    };
    let Some(existing) = messages.iter_mut().find(|m| is_instruction(m)) else {
        messages.insert(0, json!({"role": "system", "content": instructions}));
        return;
    };

    match &mut existing["content"] {
        Value::String(text) if !text.is_empty() => {
            text.push_str("\n\n");
            text.push_str(instructions);
        }
        Value::Array(parts) => parts.push(json!({"type": "text", "text": instructions})),
        other => *other = Value::String(instructions.to_string()),
    }
}

/// The `messages` array, created when absent or malformed
fn messages_mut(body: &mut JsonMap) -> Option<&mut Vec<Value>> {
    if !body.get("messages").is_some_and(Value::is_array) {
        body.insert("messages".to_string(), Value::Array(Vec::new()));
    }
    body.get_mut("messages").and_then(Value::as_array_mut)
}

fn is_instruction(message: &Value) -> bool {
    matches!(
        message.get("role").and_then(Value::as_str),
        Some("system") | Some("developer")
    )
}

/// The schema of a `json_schema` response format, if one was requested
fn json_schema(body: &JsonMap) -> Option<Value> {
    let format = body.get("response_format")?;
    if format.get("type").and_then(Value::as_str) != Some("json_schema") {
        return None;
    }
    let spec = format.get("json_schema")?;
    Some(spec.get("schema").cloned().unwrap_or_else(|| spec.clone()))
}

/// Declare the tool the schema instructions point at, unless the caller already did
fn add_structured_output_tool(body: &mut JsonMap, schema: Value) {
    if !body.get("tools").is_some_and(Value::is_array) {
        body.insert("tools".to_string(), Value::Array(Vec::new()));
    }
    let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
        return;
    };
    let declared = tools.iter().any(|tool| {
        tool.pointer("/function/name").and_then(Value::as_str) == Some(STRUCTURED_OUTPUT_TOOL)
    });
    if !declared {
        tools.push(json!({
            "type": "function",
            "function": {
                "name": STRUCTURED_OUTPUT_TOOL,
                "description": "Return the final answer as structured data",
                "parameters": schema
            }
        }));
    }
}

fn schema_instructions(schema: &Value) -> String {
    format!(
        "Respond only by calling the `{}` tool. Its arguments must be a JSON object that \
         conforms to this JSON schema:\n{}",
        STRUCTURED_OUTPUT_TOOL, schema
    )
}
