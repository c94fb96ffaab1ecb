//! The canonical outbound response

use crate::error::GatewayError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub const HEADER_GATEWAY_EXCEPTION: &str = "x-relaygate-gateway-exception";
pub const HEADER_RETRY_COUNT: &str = "x-relaygate-retry-attempt-count";
pub const HEADER_CACHE_STATUS: &str = "x-relaygate-cache-status";
pub const HEADER_LAST_USED_OPTION: &str = "x-relaygate-last-used-option-index";
pub const HEADER_PROVIDER: &str = "x-relaygate-provider";

/// Outcome of the response cache lookup for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
    Disabled,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Disabled => "DISABLED",
        }
    }
}

/// Retries performed by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCount {
    /// Finished within budget after this many retries
    Within(u32),
    /// Every retry was used and the last response was still retriable
    Exhausted,
}

impl RetryCount {
    /// Wire form: the retry count, or `-1` once exhausted
    pub fn as_i64(&self) -> i64 {
        match self {
            RetryCount::Within(n) => i64::from(*n),
            RetryCount::Exhausted => -1,
        }
    }
}

impl Default for RetryCount {
    fn default() -> Self {
        RetryCount::Within(0)
    }
}

/// Routing metadata carried alongside a response
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub provider: Option<String>,
    pub retry_count: RetryCount,
    pub cache_status: Option<CacheStatus>,
    pub last_used_option_index: Option<usize>,
    /// The response was produced by the gateway itself after an internal failure
    pub gateway_exception: bool,
}

/// Stream of canonical SSE bytes
pub struct ChunkStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>,
}

impl ChunkStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Consumer side of a producer/consumer pipe
    pub fn from_receiver(rx: mpsc::Receiver<Result<Bytes, GatewayError>>) -> Self {
        Self::new(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    /// A stream over pre-rendered SSE lines
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self::new(futures::stream::iter(
            lines.into_iter().map(|l| Ok(Bytes::from(l))),
        ))
    }

    /// Drain the stream into a single string
    pub async fn collect_text(mut self) -> Result<String, GatewayError> {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&String::from_utf8_lossy(&chunk?));
        }
        Ok(out)
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkStream")
    }
}

/// Response body variants
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    /// Unmodified upstream bytes (audio, images, file content)
    Bytes(Bytes),
    Stream(ChunkStream),
}

/// A normalized response, whichever provider produced it
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub meta: ResponseMeta,
}

impl GatewayResponse {
    pub fn json(status: StatusCode, body: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: ResponseBody::Json(body),
            meta: ResponseMeta::default(),
        }
    }

    pub fn stream(status: StatusCode, stream: ChunkStream) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        Self {
            status,
            headers,
            body: ResponseBody::Stream(stream),
            meta: ResponseMeta::default(),
        }
    }

    pub fn bytes(status: StatusCode, content_type: Option<HeaderValue>, bytes: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, ct);
        }
        Self {
            status,
            headers,
            body: ResponseBody::Bytes(bytes),
            meta: ResponseMeta::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Copy routing metadata into response headers
    pub fn apply_meta_headers(&mut self) {
        let meta = self.meta.clone();
        if let Some(provider) = &meta.provider {
            insert_header(&mut self.headers, HEADER_PROVIDER, provider);
        }
        insert_header(
            &mut self.headers,
            HEADER_RETRY_COUNT,
            &meta.retry_count.as_i64().to_string(),
        );
        if let Some(cache) = meta.cache_status {
            insert_header(&mut self.headers, HEADER_CACHE_STATUS, cache.as_str());
        }
        if let Some(idx) = meta.last_used_option_index {
            insert_header(&mut self.headers, HEADER_LAST_USED_OPTION, &idx.to_string());
        }
        if meta.gateway_exception {
            insert_header(&mut self.headers, HEADER_GATEWAY_EXCEPTION, "true");
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), v);
    }
}
