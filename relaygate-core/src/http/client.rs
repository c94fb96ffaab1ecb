//! HTTP client implementation using reqwest

use crate::config::redact_by_field_name;
use crate::http::error::HttpError;
use crate::protocol::request::{FormValue, RequestBody};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder, Method, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default user agent
const USER_AGENT: &str = concat!("relaygate/", env!("CARGO_PKG_VERSION"));

/// Timeout applied when a target does not set `request_timeout_ms`
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// One upstream call
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Bound on the time until response headers arrive
    pub timeout: Option<Duration>,
    pub request_id: Uuid,
}

impl UpstreamRequest {
    pub fn new(method: Method, url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body,
            timeout: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(Duration::from_secs(10), 10)
    }

    /// Create a new HTTP client with custom pool settings
    pub fn with_config(connect_timeout: Duration, max_idle_per_host: usize) -> Result<Self, HttpError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| HttpError::Build(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Send a request and return once response headers arrive.
    ///
    /// The body is left unread so the caller can buffer or stream it.
    pub async fn send(&self, request: UpstreamRequest) -> Result<Response, HttpError> {
        let request_id = request.request_id;
        let timeout = request.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        info!(
            "Executing {} {} [request_id: {}]",
            request.method, request.url, request_id
        );
        for (name, value) in request.headers.iter() {
            debug!(
                "  {}: {} [request_id: {}]",
                name,
                redact_by_field_name(name.as_str(), value.to_str().unwrap_or("<binary>")),
                request_id
            );
        }

        let mut headers = request.headers;
        let mut builder = self.client.request(request.method, &request.url);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(map) => builder.json(&map),
            RequestBody::Multipart(parts) => {
                // reqwest sets the boundary-carrying content type itself
                headers.remove(CONTENT_TYPE);
                builder.multipart(build_form(parts)?)
            }
            RequestBody::Binary {
                content_type,
                bytes,
            } => {
                let value = HeaderValue::from_str(&content_type)
                    .map_err(|e| HttpError::Build(e.to_string()))?;
                headers.insert(CONTENT_TYPE, value);
                builder.body(bytes)
            }
        };
        builder = builder
            .headers(headers)
            .header("X-Request-ID", request_id.to_string());

        let response = match tokio::time::timeout(timeout, builder.send()).await {
            Err(_) => {
                warn!("Request timeout after {:?} [request_id: {}]", timeout, request_id);
                return Err(HttpError::Timeout {
                    timeout,
                    request_id,
                });
            }
            Ok(Err(e)) => {
                let err = HttpError::from_reqwest(e, timeout, request_id);
                error!("{}", err);
                return Err(err);
            }
            Ok(Ok(response)) => response,
        };

        debug!(
            "Response status: {} [request_id: {}]",
            response.status(),
            request_id
        );
        Ok(response)
    }
}

fn build_form(parts: Vec<crate::protocol::request::FormPart>) -> Result<Form, HttpError> {
    let mut form = Form::new();
    for part in parts {
        form = match part.value {
            FormValue::Text(text) => form.text(part.name, text),
            FormValue::File {
                filename,
                content_type,
                bytes,
            } => {
                let mut file = Part::bytes(bytes.to_vec()).file_name(filename);
                if let Some(ct) = content_type {
                    file = file
                        .mime_str(&ct)
                        .map_err(|e| HttpError::Build(e.to_string()))?;
                }
                form.part(part.name, file)
            }
        };
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_json_body_and_request_id_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_json(json!({"input": "hi"})))
            .and(header_exists("x-request-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let body = RequestBody::Json(json!({"input": "hi"}).as_object().cloned().unwrap());
        let request =
            UpstreamRequest::new(Method::POST, format!("{}/v1/embeddings", server.uri()), body);
        let response = client.send(request).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_binary_body_sets_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let body = RequestBody::Binary {
            content_type: "application/octet-stream".into(),
            bytes: bytes::Bytes::from_static(b"\x00\x01"),
        };
        let response = client
            .send(UpstreamRequest::new(Method::POST, server.uri(), body))
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();
        let request = UpstreamRequest::new(Method::GET, server.uri(), RequestBody::Empty)
            .with_timeout(Some(Duration::from_millis(50)));
        let err = client.send(request).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
