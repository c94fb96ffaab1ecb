//! HTTP transport errors and response header helpers

use reqwest::header::HeaderMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures that left the gateway without an upstream response
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out after {timeout:?} [request_id: {request_id}]")]
    Timeout { timeout: Duration, request_id: Uuid },

    #[error("connection failed: {message} [request_id: {request_id}]")]
    Connect { message: String, request_id: Uuid },

    #[error("{message} [request_id: {request_id}]")]
    Request { message: String, request_id: Uuid },

    #[error("failed to build request: {0}")]
    Build(String),
}

impl HttpError {
    /// Map a reqwest error raised while sending a request
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration, request_id: Uuid) -> Self {
        if err.is_timeout() {
            HttpError::Timeout {
                timeout,
                request_id,
            }
        } else if err.is_connect() {
            HttpError::Connect {
                message: err.to_string(),
                request_id,
            }
        } else if err.is_builder() {
            HttpError::Build(err.to_string())
        } else {
            HttpError::Request {
                message: err.to_string(),
                request_id,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }
}

/// Read the provider's retry hint.
///
/// `retry-after-ms` (milliseconds) wins over `retry-after` (seconds). HTTP-date
/// values are not supported and are ignored. Hints too large for a `Duration`
/// saturate to `Duration::MAX` so the retry policy still sees them as oversized.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(ms) = header_f64(headers, "retry-after-ms") {
        return Some(secs_saturating(ms / 1000.0));
    }
    header_f64(headers, "retry-after").map(secs_saturating)
}

fn secs_saturating(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_ms_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_retry_after_seconds_and_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));

        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_huge_retry_after_saturates() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1e20"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::MAX));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("1e30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::MAX));
    }
}
