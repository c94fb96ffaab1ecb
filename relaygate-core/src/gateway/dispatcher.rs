//! Single-target dispatch
//!
//! One dispatch serves one target of a config: build the provider request,
//! consult the cache, call the provider under the retry policy, normalize the
//! response and run output hooks. A status left retriable by the output hooks
//! loops back into the retry executor with the cumulative retry count.

use crate::config::{CacheMode, GatewayConfig, Target};
use crate::error::GatewayError;
use crate::gateway::builder::RequestBuilder;
use crate::gateway::cache::{CacheKey, DEFAULT_MAX_AGE};
use crate::gateway::Gateway;
use crate::http::client::{UpstreamRequest, DEFAULT_REQUEST_TIMEOUT};
use crate::protocol::request::{CanonicalRequest, RequestBody};
use crate::protocol::response::{CacheStatus, GatewayResponse, ResponseBody, RetryCount};
use crate::providers::adapter::{HandlerContext, ProviderAdapter};
use crate::providers::retry::{RetryExecutor, RetryPolicy};
use crate::response::normalizer::{from_cache, normalize, timeout_response, NormalizeContext};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dispatches one request to one configured target
pub struct Dispatcher<'a> {
    gateway: &'a Gateway,
    config: &'a GatewayConfig,
    index: usize,
}

/// Everything needed to repeat the upstream call
struct Attempt<'a> {
    gateway: &'a Gateway,
    adapter: &'a Arc<dyn ProviderAdapter>,
    target: &'a Target,
    request: &'a CanonicalRequest,
    url: &'a str,
    headers: &'a HeaderMap,
    body: &'a RequestBody,
    timeout: Duration,
    strict_compliance: bool,
    fallback_id: &'a str,
}

impl<'a> Dispatcher<'a> {
    pub fn new(gateway: &'a Gateway, config: &'a GatewayConfig, index: usize) -> Self {
        Self {
            gateway,
            config,
            index,
        }
    }

    pub async fn run(
        &self,
        request: &CanonicalRequest,
        deadline: Option<Instant>,
    ) -> Result<GatewayResponse, GatewayError> {
        let target = self.config.targets.get(self.index).ok_or_else(|| {
            GatewayError::Routing(format!("no target at index {}", self.index))
        })?;
        let adapter = self.gateway.registry().get(&target.provider)?;
        let provider = adapter.id().to_string();
        let builder = RequestBuilder::new(adapter.as_ref(), self.config, target);
        let prepared = builder.prepare(request);

        let url = format!(
            "{}{}",
            adapter.base_url(target),
            adapter.endpoint(&prepared, target)?
        );
        info!(
            "Dispatching {} to {} (target {}, {})",
            prepared.function,
            provider,
            self.index,
            target.label()
        );

        let hooks = self.gateway.hooks();
        if let Some(mut response) = hooks
            .run_input(&self.config.hooks, &prepared, target, &provider, &self.config.metadata)
            .await
        {
            response.meta.provider = Some(provider);
            return Ok(response);
        }

        let fallback_id = format!("relaygate-{}", Uuid::new_v4());
        let cache_key = match target.cache.mode {
            CacheMode::Simple => {
                CacheKey::for_request(&provider, &url, prepared.function, &prepared.body)
            }
            CacheMode::Disabled => None,
        };

        if let Some(key) = &cache_key {
            if let Some(cached) = self.gateway.cache().get(key).await {
                debug!("Cache hit for {} on {}", prepared.function, provider);
                let mut response = from_cache(&prepared, cached, &fallback_id);
                response.meta.provider = Some(provider.clone());
                response.meta.cache_status = Some(CacheStatus::Hit);
                let mut response = hooks
                    .run_output(&self.config.hooks, &prepared, target, &provider, &self.config.metadata, response)
                    .await;
                response.meta.provider = Some(provider);
                response.meta.cache_status = Some(CacheStatus::Hit);
                return Ok(response);
            }
        }

        let body = builder.provider_body(&prepared)?;

        let bearer = match adapter.token_source() {
            Some(source) => Some(
                self.gateway
                    .credentials()
                    .bearer(&provider, target, source.as_ref())
                    .await?,
            ),
            None => None,
        };
        let headers = adapter.headers(target, &prepared, bearer.as_deref())?;

        let mut timeout = target
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if let Some(deadline) = deadline {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }

        let attempt = Attempt {
            gateway: self.gateway,
            adapter: &adapter,
            target,
            request: &prepared,
            url: &url,
            headers: &headers,
            body: &body,
            timeout,
            strict_compliance: self.config.strict_open_ai_compliance,
            fallback_id: &fallback_id,
        };

        let policy = RetryPolicy::from_settings(&target.retry);
        let executor = RetryExecutor::new(&policy).with_deadline(deadline);
        let mut used = 0;
        let mut response = loop {
            let outcome = executor.execute(used, |_| attempt.run()).await?;
            used = outcome.attempts_used;
            let response = hooks
                .run_output(
                    &self.config.hooks,
                    &prepared,
                    target,
                    &provider,
                    &self.config.metadata,
                    outcome.response,
                )
                .await;

            let deadline_passed = deadline.is_some_and(|d| {
                Instant::now().checked_add(policy.delay).map_or(true, |at| at >= d)
            });
            if outcome.skipped || deadline_passed || !policy.should_retry(response.status, used) {
                break response;
            }

            used += 1;
            debug!(
                "Status {} after output hooks is retriable, retry {}/{}",
                response.status, used, policy.attempts
            );
            if !policy.delay.is_zero() {
                tokio::time::sleep(policy.delay).await;
            }
        };

        let exhausted =
            policy.attempts > 0 && used >= policy.attempts && policy.is_retriable(response.status);
        response.meta.retry_count = if exhausted {
            warn!(
                "Retries exhausted for {} after {} attempts (last status {})",
                provider, used, response.status
            );
            RetryCount::Exhausted
        } else {
            RetryCount::Within(used)
        };
        response.meta.provider = Some(provider.clone());
        response.meta.cache_status = Some(match &cache_key {
            Some(_) => CacheStatus::Miss,
            None => CacheStatus::Disabled,
        });

        if let (Some(key), ResponseBody::Json(body)) = (&cache_key, &response.body) {
            if response.status.is_success() {
                let ttl = target
                    .cache
                    .max_age_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_MAX_AGE);
                self.gateway.cache().put(key, body.clone(), ttl).await;
            }
        }

        debug!(
            "Dispatch to {} finished with {} after {} retries",
            provider, response.status, used
        );
        Ok(response)
    }
}

impl Attempt<'_> {
    async fn run(&self) -> Result<GatewayResponse, GatewayError> {
        let provider = self.adapter.id();

        if let Some(handler) = self.adapter.request_handler(self.request.function) {
            debug!("Using custom request handler for {} {}", provider, self.request.function);
            return handler
                .handle(HandlerContext {
                    target: self.target,
                    request: self.request,
                    body: self.body,
                    url: self.url,
                    headers: self.headers,
                    client: self.gateway.client(),
                    timeout: Some(self.timeout),
                })
                .await;
        }

        let upstream = UpstreamRequest::new(self.request.method.clone(), self.url, self.body.clone())
            .with_headers(self.headers.clone())
            .with_timeout(Some(self.timeout));

        match self.gateway.client().send(upstream).await {
            Ok(response) => {
                let ctx = NormalizeContext {
                    adapter: self.adapter,
                    target: self.target,
                    request: self.request,
                    strict_compliance: self.strict_compliance,
                    fallback_id: self.fallback_id,
                };
                normalize(response, &ctx).await
            }
            Err(e) if e.is_timeout() => {
                warn!("{}", e);
                Ok(timeout_response(provider, self.timeout))
            }
            Err(e) => Err(GatewayError::Transport {
                provider: provider.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
