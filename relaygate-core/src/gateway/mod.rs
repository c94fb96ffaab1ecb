//! The gateway: routing, dispatch and their collaborators
//!
//! A [`Gateway`] is built once at process start and shared across requests.
//! It owns only read-only state (provider registry, HTTP client, hook set)
//! plus the response cache and the best-effort credential cache.
//!
//! # Example
//!
//! ```no_run
//! use relaygate_core::config::{GatewayConfig, Target};
//! use relaygate_core::gateway::Gateway;
//! use relaygate_core::protocol::{CanonicalRequest, ChatRequest, Message};
//!
//! # async fn run() -> Result<(), relaygate_core::GatewayError> {
//! let gateway = Gateway::builder().build()?;
//! let config = GatewayConfig::single(Target::new("openai").with_api_key("sk-..."));
//! let request = CanonicalRequest::chat(&ChatRequest::new("gpt-4o-mini", vec![Message::user("Hi")]))?;
//! let response = gateway.handle(&config, &request).await;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod credentials;
pub mod dispatcher;
pub mod hooks;
pub mod realtime;

pub use builder::{RequestBuilder, STRUCTURED_OUTPUT_TOOL};
pub use cache::{CacheKey, CacheLayer, MemoryCache};
pub use credentials::{CredentialCache, DerivedToken, TokenSource};
pub use dispatcher::Dispatcher;
pub use hooks::{Hook, HookContext, HookPipeline, HookRegistry, InputVerdict, RegexMatchHook};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::client::HttpClient;
use crate::protocol::request::CanonicalRequest;
use crate::protocol::response::GatewayResponse;
use crate::providers::registry::ProviderRegistry;
use crate::providers::routing::{StrategyRouter, TargetDispatcher};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Entry point for canonical requests
pub struct Gateway {
    registry: ProviderRegistry,
    client: HttpClient,
    cache: Arc<dyn CacheLayer>,
    hooks: Arc<dyn HookPipeline>,
    credentials: Arc<CredentialCache>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Route `request` according to `config`; failures come back as canonical envelopes
    pub async fn handle(&self, config: &GatewayConfig, request: &CanonicalRequest) -> GatewayResponse {
        let started = Instant::now();
        let response = StrategyRouter::new().route(config, request, self).await;
        info!(
            "{} {} finished with {} in {:?}",
            request.method,
            request.path,
            response.status,
            started.elapsed()
        );
        response
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn cache(&self) -> &dyn CacheLayer {
        self.cache.as_ref()
    }

    pub fn hooks(&self) -> &dyn HookPipeline {
        self.hooks.as_ref()
    }

    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TargetDispatcher for Gateway {
    async fn dispatch(
        &self,
        config: &GatewayConfig,
        index: usize,
        request: &CanonicalRequest,
        deadline: Option<Instant>,
    ) -> Result<GatewayResponse, GatewayError> {
        Dispatcher::new(self, config, index).run(request, deadline).await
    }
}

/// Builder for [`Gateway`]; every part has a default
#[derive(Default)]
pub struct GatewayBuilder {
    registry: Option<ProviderRegistry>,
    client: Option<HttpClient>,
    cache: Option<Arc<dyn CacheLayer>>,
    hooks: Option<Arc<dyn HookPipeline>>,
}

impl GatewayBuilder {
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn HookPipeline>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        let client = match self.client {
            Some(client) => client,
            None => HttpClient::new().map_err(|e| GatewayError::Internal(e.to_string()))?,
        };
        Ok(Gateway {
            registry: self.registry.unwrap_or_else(ProviderRegistry::with_defaults),
            client,
            cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new())),
            hooks: self
                .hooks
                .unwrap_or_else(|| Arc::new(HookRegistry::with_defaults())),
            credentials: Arc::new(CredentialCache::new()),
        })
    }
}
