//! Provider adapter trait
//!
//! One immutable adapter exists per provider. It resolves where a request goes,
//! how it is authenticated, how canonical parameters map onto the provider body,
//! and how responses and stream frames map back to canonical shapes.

use crate::capabilities::CapabilityTable;
use crate::config::Target;
use crate::error::GatewayError;
use crate::gateway::credentials::TokenSource;
use crate::http::client::HttpClient;
use crate::protocol::function::Function;
use crate::protocol::request::{CanonicalRequest, RequestBody};
use crate::protocol::response::GatewayResponse;
use crate::protocol::types::CompletionUsage;
use crate::providers::params::ParameterConfig;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How a provider frames its streamed responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFraming {
    /// Text frames separated by `delimiter`
    Sse { delimiter: String },
    /// Length-prefixed binary event-stream messages
    EventStream,
}

impl Default for StreamFraming {
    fn default() -> Self {
        StreamFraming::Sse {
            delimiter: "\n\n".to_string(),
        }
    }
}

/// Output-rate smoothing applied while forwarding chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPacing {
    pub before_first: Duration,
    pub between_chunks: Duration,
}

/// Scratch state owned by a single stream's chunk transforms
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub id: Option<String>,
    pub model: Option<String>,
    pub created: i64,
    /// Inside a provider block that produces no canonical content (e.g. thinking)
    pub in_special_block: bool,
    /// Index of the tool call currently being streamed
    pub tool_call_index: Option<usize>,
    pub usage: Option<CompletionUsage>,
    pub finish_reason: Option<String>,
}

/// Inputs to a single chunk transform call
pub struct ChunkContext<'a> {
    pub fallback_id: &'a str,
    pub strict_compliance: bool,
    pub request: &'a CanonicalRequest,
}

/// Everything a full custom request handler needs for one attempt
pub struct HandlerContext<'a> {
    pub target: &'a Target,
    pub request: &'a CanonicalRequest,
    /// Provider body after parameter mapping
    pub body: &'a RequestBody,
    pub url: &'a str,
    pub headers: &'a HeaderMap,
    pub client: &'a HttpClient,
    pub timeout: Option<Duration>,
}

/// Replaces the generic fetch-and-transform path for a function
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<GatewayResponse, GatewayError>;
}

/// Core provider trait that all adapters implement
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id used in target configuration
    fn id(&self) -> &str;

    /// Default base URL; a target's `custom_host` takes precedence
    fn base_url(&self, target: &Target) -> String;

    /// Path (and query) appended to the base URL
    fn endpoint(&self, request: &CanonicalRequest, target: &Target)
        -> Result<String, GatewayError>;

    /// Request headers; `bearer` carries a derived token when the adapter has a token source
    fn headers(
        &self,
        target: &Target,
        request: &CanonicalRequest,
        bearer: Option<&str>,
    ) -> Result<HeaderMap, GatewayError>;

    /// Parameter mapping for `function`; `None` forwards the body unchanged
    fn parameter_config(&self, function: Function) -> Option<&ParameterConfig>;

    /// Map a provider JSON body to the canonical shape; `None` means forward it raw
    fn transform_response(
        &self,
        function: Function,
        status: StatusCode,
        body: &Value,
        target: &Target,
    ) -> Option<Value> {
        let _ = (function, status, body, target);
        None
    }

    /// Dedicated error mapping; `None` leaves the body to the error classifier
    fn transform_error(&self, status: StatusCode, body: &Value) -> Option<Value> {
        let _ = (status, body);
        None
    }

    /// Convert one upstream stream frame into canonical SSE lines
    fn transform_chunk(
        &self,
        function: Function,
        frame: &str,
        state: &mut StreamState,
        ctx: &ChunkContext<'_>,
    ) -> Vec<String> {
        let _ = (function, state, ctx);
        passthrough_chunk(frame)
    }

    fn stream_framing(&self) -> StreamFraming {
        StreamFraming::default()
    }

    fn stream_pacing(&self) -> Option<StreamPacing> {
        None
    }

    fn request_handler(&self, function: Function) -> Option<&dyn RequestHandler> {
        let _ = function;
        None
    }

    fn token_source(&self) -> Option<Arc<dyn TokenSource>> {
        None
    }

    fn capabilities(&self) -> Option<&CapabilityTable> {
        None
    }
}

/// Re-emit an already canonical `data:` frame; comments and blank frames vanish
pub fn passthrough_chunk(frame: &str) -> Vec<String> {
    let Some(payload) = frame_data(frame) else {
        return Vec::new();
    };
    if payload == "[DONE]" {
        return Vec::new();
    }
    vec![sse_line(payload)]
}

/// The joined `data:` payload of one SSE frame
pub fn frame_data(frame: &str) -> Option<String> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        let trimmed = frame.trim();
        // Some providers stream bare JSON objects without the `data:` prefix
        if trimmed.starts_with('{') {
            return Some(trimmed.to_string());
        }
        return None;
    }
    Some(data.join("\n").trim().to_string())
}

/// Render one canonical SSE line
pub fn sse_line(payload: impl AsRef<str>) -> String {
    format!("data: {}\n\n", payload.as_ref())
}

/// Seconds since the Unix epoch, for `created` fields
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
