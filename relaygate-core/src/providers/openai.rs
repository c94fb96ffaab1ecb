//! OpenAI-compatible provider implementation
//!
//! OpenAI's wire format is the canonical format, so requests map mostly by
//! name and responses pass through. The parameter configs defined here are the
//! shared base that other OpenAI-compatible providers derive from with
//! `extend` / `exclude` / `with`.

use crate::capabilities::{CapabilityTable, ModelCapabilities, ParameterSupport};
use crate::config::Target;
use crate::error::GatewayError;
use crate::protocol::function::Function;
use crate::protocol::request::CanonicalRequest;
use crate::providers::adapter::{frame_data, sse_line, ChunkContext, ProviderAdapter, StreamState};
use crate::providers::params::{ParamSpec, ParameterConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Request headers forwarded from the caller when present
const FORWARDED_HEADERS: &[&str] = &["openai-organization", "openai-project", "openai-beta"];

/// Provider speaking the OpenAI REST dialect
pub struct OpenAICompatibleProvider {
    id: String,
    base_url: String,
    configs: HashMap<Function, ParameterConfig>,
    capabilities: Option<CapabilityTable>,
}

impl OpenAICompatibleProvider {
    /// Create a provider with the shared OpenAI parameter configs
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let configs = HashMap::from([
            (Function::ChatComplete, chat_complete_params()),
            (Function::Complete, complete_params()),
            (Function::Embed, embed_params()),
            (Function::ImageGenerate, image_generate_params()),
            (Function::CreateSpeech, create_speech_params()),
        ]);
        Self {
            id: id.into(),
            base_url: base_url.into(),
            configs,
            capabilities: None,
        }
    }

    /// OpenAI itself
    pub fn openai() -> Self {
        Self::new("openai", OPENAI_BASE_URL).with_capabilities(openai_capabilities())
    }

    /// Groq: OpenAI-compatible, single choice only, no logprobs
    pub fn groq() -> Self {
        Self::new("groq", GROQ_BASE_URL)
            .map_parameter_config(Function::ChatComplete, |base| {
                base.exclude(&["logprobs", "top_logprobs", "logit_bias"])
                    .with("n", ParamSpec::new("n").reject_outside(Some(1.0), Some(1.0)))
            })
            .without_function(Function::ImageGenerate)
            .without_function(Function::CreateSpeech)
    }

    pub fn with_parameter_config(mut self, function: Function, config: ParameterConfig) -> Self {
        self.configs.insert(function, config);
        self
    }

    /// Derive a function's config from the current one
    pub fn map_parameter_config(
        mut self,
        function: Function,
        derive: impl FnOnce(ParameterConfig) -> ParameterConfig,
    ) -> Self {
        let base = self.configs.remove(&function).unwrap_or_default();
        self.configs.insert(function, derive(base));
        self
    }

    /// Forward `function` bodies unchanged
    pub fn without_function(mut self, function: Function) -> Self {
        self.configs.remove(&function);
        self
    }

    pub fn with_capabilities(mut self, table: CapabilityTable) -> Self {
        self.capabilities = Some(table);
        self
    }
}

#[async_trait]
impl ProviderAdapter for OpenAICompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_url(&self, target: &Target) -> String {
        target
            .custom_host
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/')
            .to_string()
    }

    fn endpoint(&self, request: &CanonicalRequest, _target: &Target) -> Result<String, GatewayError> {
        let path = request.versionless_path();
        Ok(match &request.query {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        })
    }

    fn headers(
        &self,
        target: &Target,
        request: &CanonicalRequest,
        bearer: Option<&str>,
    ) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let token = bearer.or_else(|| target.api_key.as_ref().map(|k| k.expose_secret()));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                GatewayError::Credentials {
                    provider: self.id.clone(),
                    message: "API key contains characters not allowed in a header".to_string(),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        for name in FORWARDED_HEADERS {
            if let Some(value) = request.headers.get(*name) {
                headers.insert(HeaderName::from_static(*name), value.clone());
            }
        }
        Ok(headers)
    }

    fn parameter_config(&self, function: Function) -> Option<&ParameterConfig> {
        self.configs.get(&function)
    }

    fn transform_response(
        &self,
        function: Function,
        status: StatusCode,
        body: &Value,
        _target: &Target,
    ) -> Option<Value> {
        if !status.is_success() || !matches!(function, Function::ChatComplete | Function::Complete) {
            return None;
        }
        let mut body = body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.entry("provider")
                .or_insert_with(|| Value::String(self.id.clone()));
        }
        Some(body)
    }

    fn transform_chunk(
        &self,
        _function: Function,
        frame: &str,
        _state: &mut StreamState,
        ctx: &ChunkContext<'_>,
    ) -> Vec<String> {
        let Some(payload) = frame_data(frame) else {
            return Vec::new();
        };
        if payload == "[DONE]" {
            return Vec::new();
        }
        if ctx.strict_compliance {
            return vec![sse_line(payload)];
        }
        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(mut chunk)) => {
                chunk
                    .entry("provider")
                    .or_insert_with(|| Value::String(self.id.clone()));
                vec![sse_line(Value::Object(chunk).to_string())]
            }
            _ => vec![sse_line(payload)],
        }
    }

    fn capabilities(&self) -> Option<&CapabilityTable> {
        self.capabilities.as_ref()
    }
}

/// Chat completions: OpenAI names, sampling bounds clamp, `n` rejects
pub fn chat_complete_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("model", ParamSpec::new("model").required())
        .field("messages", ParamSpec::new("messages").required())
        .passthrough("tools")
        .passthrough("tool_choice")
        .passthrough("parallel_tool_calls")
        .passthrough("functions")
        .passthrough("function_call")
        .passthrough("max_tokens")
        .passthrough("max_completion_tokens")
        .field("temperature", ParamSpec::new("temperature").clamp(0.0, 2.0))
        .field("top_p", ParamSpec::new("top_p").clamp(0.0, 1.0))
        .field("n", ParamSpec::new("n").reject_outside(Some(1.0), Some(128.0)))
        .passthrough("stream")
        .passthrough("stream_options")
        .passthrough("stop")
        .field("presence_penalty", ParamSpec::new("presence_penalty").clamp(-2.0, 2.0))
        .field("frequency_penalty", ParamSpec::new("frequency_penalty").clamp(-2.0, 2.0))
        .passthrough("logit_bias")
        .passthrough("logprobs")
        .passthrough("top_logprobs")
        .passthrough("user")
        .passthrough("seed")
        .passthrough("response_format")
        .passthrough("reasoning_effort")
        .passthrough("modalities")
        .passthrough("audio")
        .passthrough("prediction")
        .passthrough("store")
        .passthrough("metadata")
        .passthrough("service_tier")
}

pub fn complete_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("model", ParamSpec::new("model").required())
        .field("prompt", ParamSpec::new("prompt").required())
        .passthrough("suffix")
        .passthrough("max_tokens")
        .field("temperature", ParamSpec::new("temperature").clamp(0.0, 2.0))
        .field("top_p", ParamSpec::new("top_p").clamp(0.0, 1.0))
        .field("n", ParamSpec::new("n").reject_outside(Some(1.0), Some(128.0)))
        .passthrough("stream")
        .passthrough("stream_options")
        .passthrough("logprobs")
        .passthrough("echo")
        .passthrough("stop")
        .field("presence_penalty", ParamSpec::new("presence_penalty").clamp(-2.0, 2.0))
        .field("frequency_penalty", ParamSpec::new("frequency_penalty").clamp(-2.0, 2.0))
        .passthrough("best_of")
        .passthrough("logit_bias")
        .passthrough("user")
        .passthrough("seed")
}

pub fn embed_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("model", ParamSpec::new("model").required())
        .field("input", ParamSpec::new("input").required())
        .passthrough("encoding_format")
        .passthrough("dimensions")
        .passthrough("user")
}

pub fn image_generate_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("prompt", ParamSpec::new("prompt").required())
        .passthrough("model")
        .field("n", ParamSpec::new("n").reject_outside(Some(1.0), Some(10.0)))
        .passthrough("quality")
        .passthrough("response_format")
        .passthrough("size")
        .passthrough("style")
        .passthrough("user")
}

pub fn create_speech_params() -> ParameterConfig {
    ParameterConfig::new()
        .field("model", ParamSpec::new("model").required())
        .field("input", ParamSpec::new("input").required())
        .field("voice", ParamSpec::new("voice").required())
        .passthrough("response_format")
        .field("speed", ParamSpec::new("speed").clamp(0.25, 4.0))
}

/// o-series reasoning models reject sampling parameters
pub fn openai_capabilities() -> CapabilityTable {
    let reasoning = |prefix: &str| {
        ModelCapabilities::builder(prefix)
            .temperature(ParameterSupport::unsupported())
            .top_p(ParameterSupport::unsupported())
            .penalties(ParameterSupport::unsupported())
            .reasoning_effort(ParameterSupport::supported())
            .build()
    };
    CapabilityTable::new(vec![
        ModelCapabilities::builder("").build(),
        reasoning("o1"),
        reasoning("o3"),
        reasoning("o4"),
    ])
}
