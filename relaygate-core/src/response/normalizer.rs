//! Response normalization
//!
//! Turns an upstream HTTP response into a canonical [`GatewayResponse`]:
//! streams go through the streaming pipeline, binary bodies pass through,
//! JSON bodies are transformed and validated, and error bodies are classified.

use crate::config::Target;
use crate::error::GatewayError;
use crate::protocol::function::Function;
use crate::protocol::request::CanonicalRequest;
use crate::protocol::response::{ChunkStream, GatewayResponse, ResponseBody, ResponseMeta};
use crate::protocol::schema;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::error::{classify, classify_text};
use crate::response::simulate::simulate_stream;
use crate::response::stream::{spawn_stream, StreamSetup};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upstream headers copied onto the canonical response
const FORWARDED_HEADERS: &[&str] = &["retry-after", "retry-after-ms", "x-request-id"];

/// Inputs shared by every normalization path of one attempt
pub struct NormalizeContext<'a> {
    pub adapter: &'a Arc<dyn ProviderAdapter>,
    pub target: &'a Target,
    pub request: &'a CanonicalRequest,
    pub strict_compliance: bool,
    /// Id given to stream chunks when the provider supplies none
    pub fallback_id: &'a str,
}

impl NormalizeContext<'_> {
    fn provider(&self) -> &str {
        self.adapter.id()
    }

    fn function(&self) -> Function {
        self.request.function
    }
}

/// Normalize a live upstream response
pub async fn normalize(
    response: reqwest::Response,
    ctx: &NormalizeContext<'_>,
) -> Result<GatewayResponse, GatewayError> {
    let status = response.status();
    let headers = response.headers().clone();

    if ctx.request.is_stream() && status.is_success() {
        debug!("Streaming {} response from {}", ctx.function(), ctx.provider());
        let setup = StreamSetup {
            adapter: Arc::clone(ctx.adapter),
            function: ctx.function(),
            request: ctx.request.clone(),
            fallback_id: ctx.fallback_id.to_string(),
            strict_compliance: ctx.strict_compliance,
        };
        let mut out = GatewayResponse::stream(status, spawn_stream(response.bytes_stream(), setup));
        forward_headers(&headers, &mut out.headers);
        return Ok(out);
    }

    let bytes = response.bytes().await.map_err(|e| GatewayError::Transport {
        provider: ctx.provider().to_string(),
        message: format!("failed to read response body: {}", e),
    })?;
    normalize_buffered(status, &headers, bytes, ctx)
}

/// Normalize a fully read upstream body, dispatching on its content type
pub fn normalize_buffered(
    status: StatusCode,
    headers: &HeaderMap,
    bytes: Bytes,
    ctx: &NormalizeContext<'_>,
) -> Result<GatewayResponse, GatewayError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut out = if bytes.is_empty() {
        empty_body(status, ctx)
    } else if is_binary(&content_type) {
        GatewayResponse::bytes(status, headers.get(CONTENT_TYPE).cloned(), bytes)
    } else if content_type.starts_with("text/html") || content_type.starts_with("text/plain") {
        text_body(status, &String::from_utf8_lossy(&bytes), ctx)?
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => json_body(status, value, ctx)?,
            Err(e) if status.is_success() => {
                debug!(
                    "{} body from {} is not JSON ({}), passing through",
                    ctx.function(),
                    ctx.provider(),
                    e
                );
                GatewayResponse::bytes(status, headers.get(CONTENT_TYPE).cloned(), bytes)
            }
            Err(_) => error_response(
                status,
                classify_text(status, &String::from_utf8_lossy(&bytes), ctx.provider()).to_value(),
            ),
        }
    };

    forward_headers(headers, &mut out.headers);
    Ok(out)
}

fn is_binary(content_type: &str) -> bool {
    content_type.starts_with("audio/")
        || content_type.starts_with("image/")
        || content_type.starts_with("application/octet-stream")
}

fn empty_body(status: StatusCode, ctx: &NormalizeContext<'_>) -> GatewayResponse {
    if status.is_success() {
        return GatewayResponse {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            meta: ResponseMeta::default(),
        };
    }
    error_response(status, classify(status, &Value::Null, ctx.provider()).to_value())
}

fn text_body(
    status: StatusCode,
    text: &str,
    ctx: &NormalizeContext<'_>,
) -> Result<GatewayResponse, GatewayError> {
    if !status.is_success() {
        return Ok(error_response(
            status,
            classify_text(status, text, ctx.provider()).to_value(),
        ));
    }
    let wrapped = json!({ "html-message": text });
    let body = ctx
        .adapter
        .transform_response(ctx.function(), status, &wrapped, ctx.target)
        .unwrap_or(wrapped);
    Ok(GatewayResponse::json(status, body))
}

fn json_body(
    status: StatusCode,
    value: Value,
    ctx: &NormalizeContext<'_>,
) -> Result<GatewayResponse, GatewayError> {
    if !status.is_success() {
        let envelope = ctx
            .adapter
            .transform_error(status, &value)
            .unwrap_or_else(|| classify(status, &value, ctx.provider()).to_value());
        return Ok(error_response(status, envelope));
    }

    let body = ctx
        .adapter
        .transform_response(ctx.function(), status, &value, ctx.target)
        .unwrap_or(value);

    if let Err(message) = schema::validate(ctx.function(), &body) {
        warn!(
            "{} response from {} failed validation: {}",
            ctx.function(),
            ctx.provider(),
            message
        );
        return Err(GatewayError::SchemaValidation {
            provider: ctx.provider().to_string(),
            function: ctx.function().to_string(),
            message,
        });
    }
    Ok(GatewayResponse::json(status, body))
}

fn error_response(status: StatusCode, envelope: Value) -> GatewayResponse {
    GatewayResponse::json(status, envelope)
}

fn forward_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for name in FORWARDED_HEADERS {
        if let Some(value) = from.get(*name) {
            to.insert(HeaderName::from_static(*name), value.clone());
        }
    }
}

/// The 408 envelope reported when an attempt times out
pub fn timeout_response(provider: &str, timeout: Duration) -> GatewayResponse {
    let status = StatusCode::REQUEST_TIMEOUT;
    let body = json!({
        "error": {
            "message": format!("request to {} timed out after {}ms", provider, timeout.as_millis()),
            "type": "timeout_error",
        }
    });
    GatewayResponse::json(status, classify(status, &body, provider).to_value())
}

/// Replay a cached body, as a synthesized stream when one was requested
pub fn from_cache(request: &CanonicalRequest, body: Value, fallback_id: &str) -> GatewayResponse {
    if request.is_stream() {
        let lines = simulate_stream(request.function, &body, fallback_id);
        GatewayResponse::stream(StatusCode::OK, ChunkStream::from_lines(lines))
    } else {
        GatewayResponse::json(StatusCode::OK, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::anthropic::AnthropicProvider;
    use crate::providers::openai::OpenAICompatibleProvider;
    use reqwest::header::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        h
    }

    fn run(
        adapter: Arc<dyn ProviderAdapter>,
        function: Function,
        status: u16,
        content_type: &str,
        body: &'static [u8],
    ) -> Result<GatewayResponse, GatewayError> {
        let target = Target::new(adapter.id());
        let request = CanonicalRequest::json(function, "/v1/chat/completions", json!({})).unwrap();
        let ctx = NormalizeContext {
            adapter: &adapter,
            target: &target,
            request: &request,
            strict_compliance: false,
            fallback_id: "fb",
        };
        normalize_buffered(
            StatusCode::from_u16(status).unwrap(),
            &headers(content_type),
            Bytes::from_static(body),
            &ctx,
        )
    }

    fn openai() -> Arc<dyn ProviderAdapter> {
        Arc::new(OpenAICompatibleProvider::openai())
    }

    #[test]
    fn test_audio_passes_through_unmodified() {
        let resp = run(openai(), Function::CreateSpeech, 200, "audio/mpeg", b"ID3\x01").unwrap();
        match resp.body {
            ResponseBody::Bytes(b) => assert_eq!(&b[..], b"ID3\x01"),
            other => panic!("expected bytes, got {:?}", other),
        }
        assert_eq!(resp.headers[CONTENT_TYPE], "audio/mpeg");
    }

    #[test]
    fn test_plain_text_wrapped() {
        let resp = run(openai(), Function::Proxy, 200, "text/plain", b"pong").unwrap();
        assert_eq!(resp.json_body().unwrap()["html-message"], "pong");
    }

    #[test]
    fn test_html_error_classified() {
        let resp = run(openai(), Function::ChatComplete, 502, "text/html", b"<h1>Bad gateway</h1>").unwrap();
        let body = resp.json_body().unwrap();
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["message"], "<h1>Bad gateway</h1>");
        assert_eq!(body["error_details"]["classification"], "server_error");
    }

    #[test]
    fn test_json_error_gets_classification() {
        let resp = run(
            openai(),
            Function::ChatComplete,
            429,
            "application/json",
            br#"{"error":{"message":"Rate limit reached","type":"requests"}}"#,
        )
        .unwrap();
        let body = resp.json_body().unwrap();
        assert_eq!(body["provider"], "openai");
        assert_eq!(body["error_details"]["classification"], "rate_limited");
    }

    #[test]
    fn test_dedicated_error_transform_used() {
        let resp = run(
            Arc::new(AnthropicProvider::new()),
            Function::ChatComplete,
            400,
            "application/json",
            br#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#,
        )
        .unwrap();
        let body = resp.json_body().unwrap();
        assert_eq!(body["error"]["message"], "bad");
        assert!(body.get("error_details").is_none());
    }

    #[test]
    fn test_schema_failure_is_fatal() {
        let err = run(
            openai(),
            Function::ChatComplete,
            200,
            "application/json",
            br#"{"id":"x","object":"chat.completion","created":1,"model":"m"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::SchemaValidation { .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retry_after_forwarded() {
        let adapter = openai();
        let target = Target::new("openai");
        let request = CanonicalRequest::json(Function::Embed, "/v1/embeddings", json!({})).unwrap();
        let ctx = NormalizeContext {
            adapter: &adapter,
            target: &target,
            request: &request,
            strict_compliance: false,
            fallback_id: "fb",
        };
        let mut h = headers("application/json");
        h.insert("retry-after", HeaderValue::from_static("3"));
        let resp = normalize_buffered(
            StatusCode::SERVICE_UNAVAILABLE,
            &h,
            Bytes::from_static(b"{}"),
            &ctx,
        )
        .unwrap();
        assert_eq!(resp.headers["retry-after"], "3");
    }

    #[test]
    fn test_timeout_envelope() {
        let resp = timeout_response("groq", Duration::from_millis(250));
        assert_eq!(resp.status, StatusCode::REQUEST_TIMEOUT);
        let body = resp.json_body().unwrap();
        assert_eq!(body["error"]["type"], "timeout_error");
        assert_eq!(body["error_details"]["classification"], "timeout");
    }
}
