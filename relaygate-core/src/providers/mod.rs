//! Provider abstraction, parameter mapping and routing
//!
//! This module holds the adapter contract every provider implements, the two
//! bundled reference adapters, and the strategy engine that chooses which
//! target serves a request (with retries and error classification).

pub mod adapter;
pub mod anthropic;
pub mod conditional;
pub mod error;
pub mod openai;
pub mod params;
pub mod registry;
pub mod retry;
pub mod routing;

pub use adapter::{
    ChunkContext, HandlerContext, ProviderAdapter, RequestHandler, StreamFraming, StreamPacing,
    StreamState,
};
pub use anthropic::AnthropicProvider;
pub use conditional::ConditionalRouter;
pub use error::{classify, CanonicalError, ErrorClassification};
pub use openai::OpenAICompatibleProvider;
pub use params::{BuildError, OutOfRange, ParamSpec, ParameterConfig};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use routing::{StrategyRouter, TargetDispatcher};
