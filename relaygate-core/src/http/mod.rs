//! HTTP layer for upstream provider calls
//!
//! This module handles:
//! - Connection pooling and client management
//! - Encoding typed request bodies (JSON, multipart, binary)
//! - Transport error mapping and retry hints
//! - Request ID generation and correlation

pub mod client;
pub mod error;

pub use client::{HttpClient, UpstreamRequest, DEFAULT_REQUEST_TIMEOUT};
pub use error::{parse_retry_after, HttpError};
