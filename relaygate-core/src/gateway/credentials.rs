//! Derived bearer tokens
//!
//! Some providers exchange a long-lived credential for a short-lived bearer
//! token. Tokens are cached process-wide per (provider, credential). The lock
//! is only held to read or write the map, never across a fetch, so concurrent
//! refreshes may both fetch; the later write wins.

use crate::config::Target;
use crate::error::GatewayError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Refresh this long before a token's reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
/// Upper bound on how long a token with an unrepresentable expiry is kept
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A freshly fetched token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedToken {
    pub token: String,
    pub expires_in: Duration,
}

/// Credential exchange for one provider
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self, target: &Target) -> Result<DerivedToken, GatewayError>;
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Best-effort process-wide token cache
#[derive(Default)]
pub struct CredentialCache {
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A valid token for `target`, fetching through `source` when missing or stale
    pub async fn bearer(
        &self,
        provider: &str,
        target: &Target,
        source: &dyn TokenSource,
    ) -> Result<String, GatewayError> {
        let key = cache_key(provider, target);
        if let Some(token) = self.cached(&key) {
            return Ok(token);
        }

        debug!("Fetching derived token for {}", provider);
        let fresh = source.fetch(target).await?;
        let now = Instant::now();
        let refresh_at = now
            .checked_add(fresh.expires_in.saturating_sub(EXPIRY_MARGIN))
            .unwrap_or(now + MAX_TOKEN_LIFETIME);
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedToken {
                    token: fresh.token.clone(),
                    refresh_at,
                },
            );
        Ok(fresh.token)
    }

    fn cached(&self, key: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(key)
            .filter(|t| t.refresh_at > Instant::now())
            .map(|t| t.token.clone())
    }

    pub fn invalidate(&self, provider: &str, target: &Target) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cache_key(provider, target));
    }
}

/// Hash of the credential so raw keys never sit in the map
fn cache_key(provider: &str, target: &Target) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    if let Some(key) = &target.api_key {
        hasher.update(key.expose_secret().as_bytes());
    }
    hasher.update([0u8]);
    if let Some(host) = &target.custom_host {
        hasher.update(host.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        ttl: Duration,
    }

    #[async_trait]
    impl TokenSource for Counting {
        async fn fetch(&self, _target: &Target) -> Result<DerivedToken, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DerivedToken {
                token: format!("tok-{}", n),
                expires_in: self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn test_token_reused_until_stale() {
        let cache = CredentialCache::new();
        let source = Counting {
            calls: AtomicU32::new(0),
            ttl: Duration::from_secs(3600),
        };
        let target = Target::new("vertex").with_api_key("sa-key");
        assert_eq!(cache.bearer("vertex", &target, &source).await.unwrap(), "tok-0");
        assert_eq!(cache.bearer("vertex", &target, &source).await.unwrap(), "tok-0");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cache.invalidate("vertex", &target);
        assert_eq!(cache.bearer("vertex", &target, &source).await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_short_lived_token_refetched() {
        let cache = CredentialCache::new();
        let source = Counting {
            calls: AtomicU32::new(0),
            ttl: Duration::from_secs(10),
        };
        let target = Target::new("vertex");
        cache.bearer("vertex", &target, &source).await.unwrap();
        cache.bearer("vertex", &target, &source).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_keys_differ_per_credential() {
        let a = cache_key("p", &Target::new("p").with_api_key("one"));
        let b = cache_key("p", &Target::new("p").with_api_key("two"));
        assert_ne!(a, b);
        assert!(!a.contains("one"));
    }
}
