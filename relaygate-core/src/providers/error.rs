//! Canonical error envelope and the error classifier
//!
//! Every upstream error body, whatever its shape, is funnelled into a
//! [`CanonicalError`]. Classification never fails: a body that cannot be
//! understood is carried verbatim as the message.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Inner `error` object of the canonical envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub param: Option<String>,
    pub code: Option<String>,
}

/// Broad failure category used to suggest a remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Authentication,
    PermissionDenied,
    NotFound,
    RateLimited,
    QuotaExceeded,
    ContextLengthExceeded,
    ContentFiltered,
    InvalidRequest,
    Timeout,
    Overloaded,
    ServerError,
    Unknown,
}

impl ErrorClassification {
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key configured for this target",
            Self::PermissionDenied => "Verify the key has access to the requested model or resource",
            Self::NotFound => "Check the model name and resource identifiers",
            Self::RateLimited => "Retry after a delay or add a fallback target",
            Self::QuotaExceeded => "Increase the provider quota or switch to another target",
            Self::ContextLengthExceeded => "Shorten the prompt or lower max_tokens",
            Self::ContentFiltered => "Rephrase the request; the provider's content filter blocked it",
            Self::InvalidRequest => "Fix the request parameters reported in the message",
            Self::Timeout => "Retry the request or raise request_timeout_ms",
            Self::Overloaded => "Retry later or route to another provider",
            Self::ServerError => "Retry the request; the provider reported an internal error",
            Self::Unknown => "Inspect original_error for details",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub classification: ErrorClassification,
    pub original_error: Value,
    pub suggested_action: String,
}

/// The one error shape every provider failure is reported in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalError {
    pub error: ErrorBody,
    pub provider: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl CanonicalError {
    pub fn new(
        message: impl Into<String>,
        error_type: Option<String>,
        provider: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                error_type,
                param: None,
                code: None,
            },
            provider: provider.into(),
            status,
            error_details: None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            json!({"error": {"message": self.error.message}, "provider": self.provider, "status": self.status})
        })
    }
}

/// Classify an upstream JSON error body
pub fn classify(status: StatusCode, body: &Value, provider: &str) -> CanonicalError {
    let fields = extract_fields(body);
    let message = fields
        .message
        .clone()
        .unwrap_or_else(|| fallback_message(status, body));
    let classification = classify_status(status, &message, fields.code.as_deref(), fields.error_type.as_deref());

    CanonicalError {
        error: ErrorBody {
            message,
            error_type: fields.error_type,
            param: fields.param,
            code: fields.code,
        },
        provider: provider.to_string(),
        status: status.as_u16(),
        error_details: Some(ErrorDetails {
            classification,
            original_error: body.clone(),
            suggested_action: classification.suggested_action().to_string(),
        }),
    }
}

/// Classify a non-JSON error body (HTML error pages, plain text)
pub fn classify_text(status: StatusCode, text: &str, provider: &str) -> CanonicalError {
    classify(status, &Value::String(text.to_string()), provider)
}

#[derive(Default)]
struct ErrorFields {
    message: Option<String>,
    error_type: Option<String>,
    param: Option<String>,
    code: Option<String>,
}

fn extract_fields(body: &Value) -> ErrorFields {
    // {"error": {"message", "type", "param", "code"}}, also Anthropic's
    // {"type": "error", "error": {"type", "message"}}
    if let Some(error) = body.get("error").filter(|e| e.is_object()) {
        return ErrorFields {
            message: string_field(error, "message"),
            error_type: string_field(error, "type").or_else(|| string_field(error, "status")),
            param: string_field(error, "param"),
            code: string_field(error, "code"),
        };
    }

    // {"error": "message"} and {"message": "...", "code": ...}
    ErrorFields {
        message: string_field(body, "error")
            .or_else(|| string_field(body, "message"))
            .or_else(|| string_field(body, "detail")),
        error_type: string_field(body, "type"),
        param: None,
        code: string_field(body, "code"),
    }
}

/// String form of a field; numeric codes are rendered as text
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn fallback_message(status: StatusCode, body: &Value) -> String {
    match body {
        Value::String(text) if !text.trim().is_empty() => text.clone(),
        Value::Null => format!("HTTP error {}", status.as_u16()),
        other => other.to_string(),
    }
}

fn classify_status(
    status: StatusCode,
    message: &str,
    code: Option<&str>,
    error_type: Option<&str>,
) -> ErrorClassification {
    let hint = format!(
        "{} {} {}",
        message.to_ascii_lowercase(),
        code.unwrap_or_default().to_ascii_lowercase(),
        error_type.unwrap_or_default().to_ascii_lowercase()
    );

    if hint.contains("context_length") || hint.contains("context length") || hint.contains("too many tokens") {
        return ErrorClassification::ContextLengthExceeded;
    }
    if hint.contains("insufficient_quota") || hint.contains("quota") {
        return ErrorClassification::QuotaExceeded;
    }
    if hint.contains("content_filter") || hint.contains("content policy") || hint.contains("safety") {
        return ErrorClassification::ContentFiltered;
    }
    if hint.contains("overloaded") {
        return ErrorClassification::Overloaded;
    }

    match status.as_u16() {
        401 => ErrorClassification::Authentication,
        403 => ErrorClassification::PermissionDenied,
        404 => ErrorClassification::NotFound,
        408 | 504 => ErrorClassification::Timeout,
        429 => ErrorClassification::RateLimited,
        503 | 529 => ErrorClassification::Overloaded,
        400..=499 => ErrorClassification::InvalidRequest,
        500..=599 => ErrorClassification::ServerError,
        _ => ErrorClassification::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_openai_shape_preserved() {
        let body = json!({"error": {"message": "Invalid model", "type": "invalid_request_error", "param": "model", "code": "model_not_found"}});
        let err = classify(StatusCode::NOT_FOUND, &body, "openai");
        assert_eq!(err.error.message, "Invalid model");
        assert_eq!(err.error.param.as_deref(), Some("model"));
        let details = err.error_details.unwrap();
        assert_eq!(details.classification, ErrorClassification::NotFound);
        assert_eq!(details.original_error, body);
    }

    #[test]
    fn test_anthropic_overloaded() {
        let body = json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}});
        let err = classify(StatusCode::from_u16(529).unwrap(), &body, "anthropic");
        assert_eq!(err.error.error_type.as_deref(), Some("overloaded_error"));
        assert_eq!(err.error_details.unwrap().classification, ErrorClassification::Overloaded);
    }

    #[test]
    fn test_unparseable_body_degrades_to_raw() {
        let err = classify_text(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>", "groq");
        assert_eq!(err.error.message, "<html>bad gateway</html>");
        assert_eq!(err.status, 502);
    }

    #[test_case(401, "bad key", ErrorClassification::Authentication)]
    #[test_case(429, "slow down", ErrorClassification::RateLimited)]
    #[test_case(429, "You exceeded your current quota", ErrorClassification::QuotaExceeded)]
    #[test_case(400, "maximum context length is 8192 tokens", ErrorClassification::ContextLengthExceeded)]
    #[test_case(500, "boom", ErrorClassification::ServerError)]
    fn test_classification(status: u16, message: &str, expected: ErrorClassification) {
        let body = json!({"error": {"message": message}});
        let err = classify(StatusCode::from_u16(status).unwrap(), &body, "p");
        assert_eq!(err.error_details.unwrap().classification, expected);
    }

    #[test]
    fn test_envelope_serialization() {
        let value = CanonicalError::new("x", None, "openai", 500).to_value();
        assert_eq!(value["error"]["message"], "x");
        assert!(value["error"]["type"].is_null());
        assert!(value.get("error_details").is_none());
    }
}
