//! Protocol module: the canonical, provider-agnostic data model
//!
//! Requests enter the gateway as a [`CanonicalRequest`] and leave it as a
//! [`GatewayResponse`], whichever provider served them.

pub mod function;
pub mod request;
pub mod response;
pub mod schema;
pub mod types;

pub use function::Function;
pub use request::{CanonicalRequest, FormPart, FormValue, JsonMap, RequestBody};
pub use response::{
    CacheStatus, ChunkStream, GatewayResponse, ResponseBody, ResponseMeta, RetryCount,
};
pub use types::{
    ChatRequest, ChatResponse, ChatStreamChunk, CompletionUsage, ContentPart, FunctionCall,
    FunctionCallDelta, FunctionDefinition, Message, MessageContent, MessageDelta, MessageRole,
    ResponseChoice, ResponseFormat, StreamChoice, StreamOptions, ToolCall, ToolCallDelta,
    ToolDefinition,
};
