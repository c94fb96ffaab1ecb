//! Response cache
//!
//! Keys are derived from the fully resolved request: provider, URL, function
//! and the provider body with the `stream` flag removed, so a streamed and a
//! buffered call for the same content share one entry.

use crate::protocol::function::Function;
use crate::protocol::request::{JsonMap, RequestBody};
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Entry lifetime when a target does not set `max_age_secs`
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Opaque cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for `function` sent to `url` on `provider` with `body`.
    ///
    /// Returns `None` for bodies that are not cacheable (multipart, binary).
    pub fn for_request(
        provider: &str,
        url: &str,
        function: Function,
        body: &RequestBody,
    ) -> Option<Self> {
        let body = match body {
            RequestBody::Json(map) => Value::Object(without_stream(map)),
            RequestBody::Empty => Value::Null,
            RequestBody::Multipart(_) | RequestBody::Binary { .. } => return None,
        };

        let mut hasher = Sha256::new();
        for part in [provider, url, function.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        // serde_json maps are ordered, so equal bodies serialize identically
        hasher.update(body.to_string().as_bytes());
        let digest = hasher.finalize();
        Some(Self(digest.iter().map(|b| format!("{:02x}", b)).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn without_stream(map: &JsonMap) -> JsonMap {
    let mut map = map.clone();
    map.remove("stream");
    map.remove("stream_options");
    map
}

/// Storage for cached response bodies
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Value>;
    async fn put(&self, key: &CacheKey, body: Value, ttl: Duration);
}

struct Entry {
    body: Value,
    expires_at: Instant,
}

/// In-process cache with per-entry expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.body.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        None
    }

    async fn put(&self, key: &CacheKey, body: Value, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.clone(),
            Entry {
                body,
                expires_at: now + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> RequestBody {
        match value {
            Value::Object(map) => RequestBody::Json(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_stream_flag_does_not_change_key() {
        let url = "https://api.openai.com/v1/chat/completions";
        let a = CacheKey::for_request("openai", url, Function::ChatComplete, &body(json!({"model": "m", "stream": true})));
        let b = CacheKey::for_request("openai", url, Function::ChatComplete, &body(json!({"model": "m"})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_provider_and_body_change_key() {
        let url = "https://x/v1/chat/completions";
        let a = CacheKey::for_request("openai", url, Function::ChatComplete, &body(json!({"model": "m"})));
        let b = CacheKey::for_request("groq", url, Function::ChatComplete, &body(json!({"model": "m"})));
        let c = CacheKey::for_request("openai", url, Function::ChatComplete, &body(json!({"model": "n"})));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_multipart_not_cacheable() {
        assert!(CacheKey::for_request("openai", "u", Function::UploadFile, &RequestBody::Multipart(vec![])).is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        let key = CacheKey::for_request("p", "u", Function::Embed, &RequestBody::Empty).unwrap();
        cache.put(&key, json!({"a": 1}), Duration::from_millis(20)).await;
        assert_eq!(cache.get(&key).await, Some(json!({"a": 1})));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&key).await, None);
        assert!(cache.is_empty());
    }
}
