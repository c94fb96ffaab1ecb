//! The canonical inbound request

use crate::error::GatewayError;
use crate::protocol::function::Function;
use crate::protocol::types::ChatRequest;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::{Map, Value};

/// JSON object body
pub type JsonMap = Map<String, Value>;

/// One part of a multipart form body
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        filename: String,
        content_type: Option<String>,
        bytes: Bytes,
    },
}

/// Typed request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(JsonMap),
    Multipart(Vec<FormPart>),
    /// Raw passthrough (binary uploads, pre-encoded streams)
    Binary { content_type: String, bytes: Bytes },
}

/// A provider-agnostic request, built once per inbound call.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub function: Function,
    pub method: Method,
    /// Downstream path, e.g. `/v1/files/file-abc`
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl CanonicalRequest {
    /// Build a request for `function` with its canonical route
    pub fn new(function: Function, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            function,
            method: function.method(),
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Build a JSON request; the body must be an object
    pub fn json(
        function: Function,
        path: impl Into<String>,
        body: Value,
    ) -> Result<Self, GatewayError> {
        match body {
            Value::Object(map) => Ok(Self::new(function, path, RequestBody::Json(map))),
            other => Err(GatewayError::InvalidRequest(format!(
                "request body for {} must be a JSON object, got {}",
                function,
                json_kind(&other)
            ))),
        }
    }

    /// Build a chat completion request from the typed chat body
    pub fn chat(request: &ChatRequest) -> Result<Self, GatewayError> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        Self::json(Function::ChatComplete, "/v1/chat/completions", body)
    }

    /// Build a request from a raw downstream route.
    ///
    /// Any body sent with a GET or DELETE route is discarded.
    pub fn from_route(
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Self {
        let path = path.into();
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        let function = Function::from_route(&method, &path);
        let body = if function.is_bodyless() {
            RequestBody::Empty
        } else {
            body
        };
        Self {
            function,
            method,
            path,
            query,
            headers,
            body,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn json_body(&self) -> Option<&JsonMap> {
        match &self.body {
            RequestBody::Json(map) => Some(map),
            _ => None,
        }
    }

    /// Whether the caller asked for a streamed response
    pub fn is_stream(&self) -> bool {
        self.function.is_streamable()
            && self
                .json_body()
                .and_then(|b| b.get("stream"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    pub fn model(&self) -> Option<&str> {
        match &self.body {
            RequestBody::Json(map) => map.get("model").and_then(Value::as_str),
            RequestBody::Multipart(parts) => parts.iter().find_map(|p| match &p.value {
                FormValue::Text(v) if p.name == "model" => Some(v.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Path with the `/v1` prefix removed, used by OpenAI-shaped endpoints
    pub fn versionless_path(&self) -> &str {
        self.path.strip_prefix("/v1").unwrap_or(&self.path)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
