//! Input and output hooks
//!
//! A config lists hooks by name; the [`HookPipeline`] resolves those names to
//! [`Hook`] implementations. Input hooks run before the network call and may
//! deny the request or answer it themselves. Output hooks run on every
//! normalized response, and the dispatcher re-checks the retry policy against
//! the status they leave behind.

use crate::config::{HookConfig, HookKind, Target};
use crate::error::GatewayError;
use crate::protocol::request::{CanonicalRequest, JsonMap};
use crate::protocol::response::GatewayResponse;
use crate::protocol::types::{Message, MessageRole};
use crate::providers::error::CanonicalError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status of a response denied by an input hook
pub const HOOK_DENIED_STATUS: u16 = 446;

/// What a hook sees
pub struct HookContext<'a> {
    pub request: &'a CanonicalRequest,
    pub target: &'a Target,
    pub provider: &'a str,
    pub metadata: &'a JsonMap,
    /// The `options` block of the hook's config entry
    pub options: &'a JsonMap,
}

/// Result of one input hook
#[derive(Debug)]
pub enum InputVerdict {
    Continue,
    Deny { reason: String },
    Respond(GatewayResponse),
}

#[async_trait]
pub trait Hook: Send + Sync {
    async fn before_request(&self, ctx: &HookContext<'_>) -> Result<InputVerdict, GatewayError> {
        let _ = ctx;
        Ok(InputVerdict::Continue)
    }

    async fn after_response(
        &self,
        ctx: &HookContext<'_>,
        response: GatewayResponse,
    ) -> Result<GatewayResponse, GatewayError> {
        let _ = ctx;
        Ok(response)
    }
}

/// Runs the hooks a config asks for
#[async_trait]
pub trait HookPipeline: Send + Sync {
    /// `None` lets the request continue; `Some` is the response to return instead
    async fn run_input(
        &self,
        hooks: &[HookConfig],
        request: &CanonicalRequest,
        target: &Target,
        provider: &str,
        metadata: &JsonMap,
    ) -> Option<GatewayResponse>;

    async fn run_output(
        &self,
        hooks: &[HookConfig],
        request: &CanonicalRequest,
        target: &Target,
        provider: &str,
        metadata: &JsonMap,
        response: GatewayResponse,
    ) -> GatewayResponse;
}

/// Name-indexed hook set
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled hooks (`regex_match`)
    pub fn with_defaults() -> Self {
        Self::new().register("regex_match", RegexMatchHook)
    }

    pub fn register<H: Hook + 'static>(mut self, name: impl Into<String>, hook: H) -> Self {
        self.hooks.insert(name.into(), Arc::new(hook));
        self
    }

    fn resolve<'a>(&'a self, entry: &HookConfig) -> Option<&'a Arc<dyn Hook>> {
        let hook = self.hooks.get(&entry.name);
        if hook.is_none() {
            warn!("Hook '{}' is not registered, skipping", entry.name);
        }
        hook
    }
}

#[async_trait]
impl HookPipeline for HookRegistry {
    async fn run_input(
        &self,
        hooks: &[HookConfig],
        request: &CanonicalRequest,
        target: &Target,
        provider: &str,
        metadata: &JsonMap,
    ) -> Option<GatewayResponse> {
        for entry in hooks.iter().filter(|h| h.kind == HookKind::Input) {
            let Some(hook) = self.resolve(entry) else {
                continue;
            };
            let ctx = HookContext {
                request,
                target,
                provider,
                metadata,
                options: &entry.options,
            };
            match hook.before_request(&ctx).await {
                Ok(InputVerdict::Continue) => {}
                Ok(InputVerdict::Deny { reason }) => {
                    info!("Input hook '{}' denied the request: {}", entry.name, reason);
                    return Some(denied(&entry.name, &reason, provider));
                }
                Ok(InputVerdict::Respond(response)) => {
                    debug!("Input hook '{}' answered the request", entry.name);
                    return Some(response);
                }
                Err(e) => warn!("Input hook '{}' failed, ignoring: {}", entry.name, e),
            }
        }
        None
    }

    async fn run_output(
        &self,
        hooks: &[HookConfig],
        request: &CanonicalRequest,
        target: &Target,
        provider: &str,
        metadata: &JsonMap,
        mut response: GatewayResponse,
    ) -> GatewayResponse {
        for entry in hooks.iter().filter(|h| h.kind == HookKind::Output) {
            let Some(hook) = self.resolve(entry) else {
                continue;
            };
            let ctx = HookContext {
                request,
                target,
                provider,
                metadata,
                options: &entry.options,
            };
            let meta = response.meta.clone();
            response = match hook.after_response(&ctx, response).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Output hook '{}' failed: {}", entry.name, e);
                    let mut failed = e.into_response(Some(provider));
                    failed.meta = meta;
                    failed
                }
            };
        }
        response
    }
}

fn denied(hook: &str, reason: &str, provider: &str) -> GatewayResponse {
    let status = StatusCode::from_u16(HOOK_DENIED_STATUS).unwrap_or(StatusCode::FORBIDDEN);
    let envelope = CanonicalError::new(
        format!("request denied by hook '{}': {}", hook, reason),
        Some("hook_denied".to_string()),
        provider,
        status.as_u16(),
    );
    GatewayResponse::json(status, envelope.to_value())
}

/// Denies requests whose latest user message matches `options.pattern`.
///
/// With `options.not: true` the request is denied when it does *not* match.
pub struct RegexMatchHook;

#[async_trait]
impl Hook for RegexMatchHook {
    async fn before_request(&self, ctx: &HookContext<'_>) -> Result<InputVerdict, GatewayError> {
        let pattern = ctx
            .options
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidRequest("regex_match needs options.pattern".into()))?;
        let regex = Regex::new(pattern)
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid pattern: {}", e)))?;
        let invert = ctx.options.get("not").and_then(Value::as_bool).unwrap_or(false);

        let text = last_user_text(ctx.request).unwrap_or_default();
        if regex.is_match(&text) != invert {
            return Ok(InputVerdict::Deny {
                reason: if invert {
                    format!("input does not match /{}/", pattern)
                } else {
                    format!("input matches /{}/", pattern)
                },
            });
        }
        Ok(InputVerdict::Continue)
    }
}

fn last_user_text(request: &CanonicalRequest) -> Option<String> {
    let body = request.json_body()?;
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        return messages
            .iter()
            .rev()
            .filter_map(|m| serde_json::from_value::<Message>(m.clone()).ok())
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text_content());
    }
    body.get("prompt").and_then(Value::as_str).map(str::to_string)
}
