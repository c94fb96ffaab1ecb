//! Canonical response shapes beyond chat, and per-function body validation

use crate::protocol::function::Function;
use crate::protocol::types::{ChatResponse, CompletionUsage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: usize,
    #[serde(default)]
    pub logprobs: Option<Value>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Embedding response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<Embedding>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub object: String,
    /// A float array, or a base64 string when `encoding_format` is `base64`
    pub embedding: EmbeddingVector,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Float(Vec<f64>),
    Base64(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

/// Image generation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Check a successful body against the canonical shape for `function`.
///
/// Functions without a modelled shape only need to be a JSON object or array.
pub fn validate(function: Function, body: &Value) -> Result<(), String> {
    match function {
        Function::ChatComplete => check::<ChatResponse>(body),
        Function::Complete => check::<CompletionResponse>(body),
        Function::Embed => check::<EmbeddingResponse>(body),
        Function::ImageGenerate => {
            let image: ImageResponse = parse(body)?;
            if image
                .data
                .iter()
                .any(|d| d.url.is_none() && d.b64_json.is_none())
            {
                return Err("image entry has neither `url` nor `b64_json`".to_string());
            }
            Ok(())
        }
        Function::Proxy => Ok(()),
        _ => match body {
            Value::Object(_) | Value::Array(_) => Ok(()),
            other => Err(format!("expected a JSON object, got `{}`", other)),
        },
    }
}

fn check<T: DeserializeOwned>(body: &Value) -> Result<(), String> {
    parse::<T>(body).map(|_| ())
}

fn parse<T: DeserializeOwned>(body: &Value) -> Result<T, String> {
    T::deserialize(body).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_body_requires_choices() {
        let body = json!({"id": "x", "object": "chat.completion", "created": 1, "model": "m"});
        let err = validate(Function::ChatComplete, &body).unwrap_err();
        assert!(err.contains("choices"));
    }

    #[test]
    fn test_embedding_accepts_base64_vectors() {
        let body = json!({
            "object": "list",
            "model": "text-embedding-3-small",
            "data": [{"object": "embedding", "embedding": "AAAA", "index": 0}]
        });
        assert!(validate(Function::Embed, &body).is_ok());
    }

    #[test]
    fn test_image_entry_needs_payload() {
        let body = json!({"created": 1, "data": [{"revised_prompt": "a cat"}]});
        assert!(validate(Function::ImageGenerate, &body).is_err());
    }

    #[test]
    fn test_lifecycle_functions_accept_any_object() {
        assert!(validate(Function::RetrieveBatch, &json!({"id": "batch_1"})).is_ok());
        assert!(validate(Function::RetrieveBatch, &json!("batch_1")).is_err());
    }
}
