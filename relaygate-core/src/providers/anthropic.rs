//! Anthropic provider implementation
//!
//! Maps canonical chat requests onto the Messages API: system turns move to the
//! top-level `system` field, tool calls and results become content blocks, and
//! `max_tokens` is mandatory. Responses and stream events are mapped back to
//! the canonical chat shapes.

use crate::capabilities::{CapabilityTable, ModelCapabilities, ParameterSupport};
use crate::config::Target;
use crate::error::GatewayError;
use crate::protocol::function::Function;
use crate::protocol::request::{CanonicalRequest, JsonMap};
use crate::protocol::types::{
    ChatResponse, ChatStreamChunk, CompletionUsage, FunctionCall, FunctionCallDelta, Message,
    MessageContent, MessageDelta, MessageRole, ResponseChoice, StreamChoice, ToolCall,
    ToolCallDelta,
};
use crate::providers::adapter::{
    frame_data, sse_line, unix_timestamp, ChunkContext, ProviderAdapter, StreamState,
};
use crate::providers::error::CanonicalError;
use crate::providers::params::{ParamSpec, ParameterConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::warn;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider implementation
pub struct AnthropicProvider {
    chat: ParameterConfig,
    capabilities: CapabilityTable,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new() -> Self {
        Self {
            chat: chat_complete_params(),
            capabilities: anthropic_capabilities(),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn base_url(&self, target: &Target) -> String {
        target
            .custom_host
            .as_deref()
            .unwrap_or(ANTHROPIC_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String, GatewayError> {
        match request.function {
            Function::ChatComplete => Ok("/messages".to_string()),
            other => Err(GatewayError::InvalidRequest(format!(
                "anthropic does not support {}",
                other
            ))),
        }
    }

    fn headers(
        &self,
        target: &Target,
        request: &CanonicalRequest,
        _bearer: Option<&str>,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        if let Some(key) = target.api_key.as_ref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key.expose_secret()).map_err(|_| {
                GatewayError::Credentials {
                    provider: "anthropic".to_string(),
                    message: "API key contains characters not allowed in a header".to_string(),
                }
            })?;
            headers.insert("x-api-key", value);
        }
        if let Some(beta) = request.headers.get("anthropic-beta") {
            headers.insert("anthropic-beta", beta.clone());
        }
        Ok(headers)
    }

    fn parameter_config(&self, function: Function) -> Option<&ParameterConfig> {
        match function {
            Function::ChatComplete => Some(&self.chat),
            _ => None,
        }
    }

    fn transform_response(
        &self,
        function: Function,
        status: StatusCode,
        body: &Value,
        _target: &Target,
    ) -> Option<Value> {
        if function != Function::ChatComplete || !status.is_success() {
            return None;
        }
        let response = to_chat_response(body)?;
        serde_json::to_value(response).ok()
    }

    fn transform_error(&self, status: StatusCode, body: &Value) -> Option<Value> {
        let error = body.get("error")?;
        let envelope = CanonicalError::new(
            error.get("message").and_then(Value::as_str).unwrap_or_default(),
            error.get("type").and_then(Value::as_str).map(str::to_string),
            "anthropic",
            status.as_u16(),
        );
        Some(envelope.to_value())
    }

    fn transform_chunk(
        &self,
        _function: Function,
        frame: &str,
        state: &mut StreamState,
        ctx: &ChunkContext<'_>,
    ) -> Vec<String> {
        let Some(payload) = frame_data(frame) else {
            return Vec::new();
        };
        let event: Value = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unparseable anthropic stream frame: {}", e);
                return Vec::new();
            }
        };
        stream_event(&event, state, ctx)
    }

    fn capabilities(&self) -> Option<&CapabilityTable> {
        Some(&self.capabilities)
    }
}

/// Messages API parameter mapping
pub fn chat_complete_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("model", ParamSpec::new("model").required())
        .field(
            "messages",
            ParamSpec::new("messages").required().transform(messages_param),
        )
        .field("messages", ParamSpec::new("system").transform(system_param))
        .field("max_tokens", ParamSpec::new("max_tokens").required())
        .field("temperature", ParamSpec::new("temperature").clamp(0.0, 1.0))
        .field("top_p", ParamSpec::new("top_p").clamp(0.0, 1.0))
        .passthrough("top_k")
        .field("stop", ParamSpec::new("stop_sequences").transform(stop_param))
        .passthrough("stream")
        .field("user", ParamSpec::new("metadata.user_id"))
        .field("tools", ParamSpec::new("tools").transform(tools_param))
        .field("tool_choice", ParamSpec::new("tool_choice").transform(tool_choice_param))
        .passthrough("thinking")
}

pub fn anthropic_capabilities() -> CapabilityTable {
    CapabilityTable::new(vec![ModelCapabilities::builder("claude")
        .temperature(ParameterSupport::bounded(0.0, 1.0))
        .penalties(ParameterSupport::unsupported())
        .seed(ParameterSupport::unsupported())
        .build()])
}

fn messages_param(body: &JsonMap) -> Option<Value> {
    let messages: Vec<Message> = serde_json::from_value(body.get("messages")?.clone()).ok()?;
    let converted: Vec<Value> = messages
        .iter()
        .filter(|m| !m.is_instruction())
        .map(to_anthropic_message)
        .collect();
    Some(Value::Array(converted))
}

fn system_param(body: &JsonMap) -> Option<Value> {
    let messages: Vec<Message> = serde_json::from_value(body.get("messages")?.clone()).ok()?;
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.is_instruction())
        .map(Message::text_content)
        .filter(|s| !s.is_empty())
        .collect();
    if system.is_empty() {
        None
    } else {
        Some(Value::String(system.join("\n")))
    }
}

fn stop_param(body: &JsonMap) -> Option<Value> {
    match body.get("stop")? {
        Value::String(s) => Some(json!([s])),
        Value::Array(items) => Some(Value::Array(items.clone())),
        _ => None,
    }
}

fn tools_param(body: &JsonMap) -> Option<Value> {
    let tools = body.get("tools")?.as_array()?;
    let converted = tools
        .iter()
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(json!({
                "name": function.get("name")?,
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            }))
        })
        .collect();
    Some(Value::Array(converted))
}

fn tool_choice_param(body: &JsonMap) -> Option<Value> {
    match body.get("tool_choice")? {
        Value::String(s) if s == "required" => Some(json!({"type": "any"})),
        Value::String(s) if s == "auto" => Some(json!({"type": "auto"})),
        Value::Object(choice) => {
            let name = choice.get("function")?.get("name")?;
            Some(json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

fn to_anthropic_message(message: &Message) -> Value {
    match message.role {
        MessageRole::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                "content": message.text_content(),
            }]
        }),
        MessageRole::Assistant => {
            let mut blocks = content_blocks(message.content.as_ref());
            for call in message.tool_calls.iter().flatten() {
                let input = serde_json::from_str::<Value>(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.function.name,
                    "input": input,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        _ => json!({"role": "user", "content": content_blocks(message.content.as_ref())}),
    }
}

fn content_blocks(content: Option<&MessageContent>) -> Vec<Value> {
    let Some(content) = content else {
        return Vec::new();
    };
    if let Some(text) = content.as_text() {
        if text.is_empty() {
            return Vec::new();
        }
        return vec![json!({"type": "text", "text": text})];
    }
    let Ok(Value::Array(raw)) = serde_json::to_value(content) else {
        return Vec::new();
    };
    raw.into_iter()
        .filter_map(|part| match part.get("type").and_then(Value::as_str)? {
            "text" => Some(json!({"type": "text", "text": part.get("text")?})),
            "image_url" => {
                let url = part.get("image_url")?.get("url")?.as_str()?;
                Some(image_block(url))
            }
            _ => None,
        })
        .collect()
}

fn image_block(url: &str) -> Value {
    // data:<media_type>;base64,<data>
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data}
            });
        }
    }
    json!({"type": "image", "source": {"type": "url", "url": url}})
}

fn finish_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
    .to_string()
}

fn to_chat_response(body: &Value) -> Option<ChatResponse> {
    let content = body.get("content")?.as_array()?;
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default()),
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                tool_type: "function".to_string(),
                function: FunctionCall {
                    name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    arguments: block.get("input").map(Value::to_string).unwrap_or_else(|| "{}".into()),
                },
            }),
            _ => {}
        }
    }

    let usage = body.get("usage").map(|u| {
        CompletionUsage::new(
            u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        )
    });

    let message = Message {
        role: MessageRole::Assistant,
        content: Some(MessageContent::Text(text)),
        name: None,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
        extra: HashMap::new(),
    };

    Some(ChatResponse {
        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        provider: Some("anthropic".to_string()),
        choices: vec![ResponseChoice {
            index: 0,
            message,
            finish_reason: body
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(finish_reason),
            logprobs: None,
        }],
        usage,
        system_fingerprint: None,
    })
}

fn stream_event(event: &Value, state: &mut StreamState, ctx: &ChunkContext<'_>) -> Vec<String> {
    match event.get("type").and_then(Value::as_str) {
        Some("message_start") => {
            let message = event.get("message");
            state.id = message
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            state.model = message
                .and_then(|m| m.get("model"))
                .and_then(Value::as_str)
                .map(str::to_string);
            state.created = unix_timestamp();
            let input = message
                .and_then(|m| m.get("usage"))
                .and_then(|u| u.get("input_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            state.usage = Some(CompletionUsage::new(input, 0));
            emit(
                state,
                ctx,
                MessageDelta {
                    role: Some(MessageRole::Assistant),
                    content: Some(String::new()),
                    tool_calls: None,
                },
                None,
            )
        }
        Some("content_block_start") => {
            let block = event.get("content_block");
            match block.and_then(|b| b.get("type")).and_then(Value::as_str) {
                Some("tool_use") => {
                    let index = state.tool_call_index.map(|i| i + 1).unwrap_or(0);
                    state.tool_call_index = Some(index);
                    let field = |name: &str| {
                        block
                            .and_then(|b| b.get(name))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    };
                    let delta = ToolCallDelta {
                        index,
                        id: field("id"),
                        tool_type: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: field("name"),
                            arguments: Some(String::new()),
                        }),
                    };
                    emit(state, ctx, tool_delta(delta), None)
                }
                Some("thinking") | Some("redacted_thinking") => {
                    state.in_special_block = true;
                    Vec::new()
                }
                _ => Vec::new(),
            }
        }
        Some("content_block_delta") => {
            if state.in_special_block {
                return Vec::new();
            }
            let delta = event.get("delta");
            match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                Some("text_delta") => {
                    let text = delta
                        .and_then(|d| d.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    emit(
                        state,
                        ctx,
                        MessageDelta {
                            content: Some(text.to_string()),
                            ..Default::default()
                        },
                        None,
                    )
                }
                Some("input_json_delta") => {
                    let partial = delta
                        .and_then(|d| d.get("partial_json"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let tool = ToolCallDelta {
                        index: state.tool_call_index.unwrap_or(0),
                        id: None,
                        tool_type: None,
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some(partial.to_string()),
                        }),
                    };
                    emit(state, ctx, tool_delta(tool), None)
                }
                _ => Vec::new(),
            }
        }
        Some("content_block_stop") => {
            state.in_special_block = false;
            Vec::new()
        }
        Some("message_delta") => {
            let reason = event
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(finish_reason);
            let output = event
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let input = state.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
            state.usage = Some(CompletionUsage::new(input, output));
            state.finish_reason = reason.clone();
            emit(state, ctx, MessageDelta::default(), reason)
        }
        Some("error") => {
            let error = event.get("error").cloned().unwrap_or(Value::Null);
            vec![sse_line(json!({"error": error, "provider": "anthropic"}).to_string())]
        }
        // ping, message_stop
        _ => Vec::new(),
    }
}

fn tool_delta(delta: ToolCallDelta) -> MessageDelta {
    MessageDelta {
        tool_calls: Some(vec![delta]),
        ..Default::default()
    }
}

fn emit(
    state: &StreamState,
    ctx: &ChunkContext<'_>,
    delta: MessageDelta,
    finish_reason: Option<String>,
) -> Vec<String> {
    let usage = if finish_reason.is_some() {
        state.usage.clone()
    } else {
        None
    };
    let chunk = ChatStreamChunk {
        id: state.id.clone().unwrap_or_else(|| ctx.fallback_id.to_string()),
        object: "chat.completion.chunk".to_string(),
        created: state.created,
        model: state.model.clone().unwrap_or_default(),
        provider: if ctx.strict_compliance {
            None
        } else {
            Some("anthropic".to_string())
        },
        choices: vec![StreamChoice {
            index: 0,
            delta,
            finish_reason,
            logprobs: None,
        }],
        usage,
    };
    match serde_json::to_string(&chunk) {
        Ok(line) => vec![sse_line(line)],
        Err(e) => {
            warn!("Failed to serialize stream chunk: {}", e);
            Vec::new()
        }
    }
}
