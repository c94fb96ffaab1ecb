//! Provider registry
//!
//! Built once at process start and read-only afterwards; adapters are shared
//! across requests behind `Arc`.

use crate::error::GatewayError;
use crate::providers::adapter::ProviderAdapter;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::openai::OpenAICompatibleProvider;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Immutable map of provider id to adapter
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Registry with the bundled adapters (openai, groq, anthropic)
    pub fn with_defaults() -> Self {
        Self::builder()
            .register(OpenAICompatibleProvider::openai())
            .register(OpenAICompatibleProvider::groq())
            .register(AnthropicProvider::new())
            .build()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Registered provider ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

/// Builder for [`ProviderRegistry`]
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistryBuilder {
    /// Register an adapter under its own id; a later registration replaces an earlier one
    pub fn register<A: ProviderAdapter + 'static>(self, adapter: A) -> Self {
        self.register_arc(Arc::new(adapter))
    }

    pub fn register_arc(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.insert(adapter.id().to_string(), adapter);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.ids(), vec!["anthropic", "groq", "openai"]);
        assert_eq!(registry.get("groq").unwrap().id(), "groq");
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let registry = ProviderRegistry::builder().build();
        let err = registry.get("mistral").err().unwrap();
        assert!(matches!(err, GatewayError::UnknownProvider(ref id) if id == "mistral"));
    }

    #[test]
    fn test_custom_compatible_provider() {
        let registry = ProviderRegistry::builder()
            .register(OpenAICompatibleProvider::new("local", "http://127.0.0.1:11434/v1"))
            .build();
        assert!(registry.contains("local"));
    }
}
