//! Relaygate Core Library
//!
//! This crate routes one canonical AI-inference request (chat, completion,
//! embedding, files, batches, realtime and more) to any registered provider and
//! hands back a normalized response or chunk stream, whichever provider served it.
//!
//! The pieces, leaf to root:
//!
//! - [`protocol`]: the canonical request/response model
//! - [`providers`]: the adapter contract, parameter mapping, retries and routing strategies
//! - [`gateway`]: per-target request building, dispatch, cache, hooks and credentials
//! - [`response`]: normalization of buffered, streamed and cached responses
//! - [`config`]: gateway configuration loading and validation

pub mod capabilities;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod response;

pub use config::{GatewayConfig, Target};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayBuilder};
pub use protocol::{CanonicalRequest, Function, GatewayResponse};
pub use providers::{ProviderAdapter, ProviderRegistry};

/// Returns the version of the Relaygate Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
