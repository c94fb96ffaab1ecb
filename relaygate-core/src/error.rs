//! Gateway error taxonomy

use crate::config::ConfigError;
use crate::protocol::response::GatewayResponse;
use crate::providers::error::CanonicalError;
use crate::providers::params::BuildError;
use reqwest::StatusCode;
use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised inside the gateway.
///
/// Upstream non-2xx responses are not errors: they are normalized into canonical
/// envelopes and travel as ordinary responses.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Conditional routing could not resolve exactly one target
    #[error("{0}")]
    Routing(String),

    /// Parameter contract violated while building the provider body
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider '{0}' is not registered")]
    UnknownProvider(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A successful upstream body did not match the canonical schema
    #[error("{provider} returned a {function} body that failed validation: {message}")]
    SchemaValidation {
        provider: String,
        function: String,
        message: String,
    },

    /// No HTTP response was obtained at all
    #[error("transport failure calling {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("credential exchange failed for {provider}: {message}")]
    Credentials { provider: String, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Routing(_)
            | GatewayError::Build(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::UnknownProvider(_)
            | GatewayError::Config(_) => StatusCode::BAD_REQUEST,
            GatewayError::SchemaValidation { .. }
            | GatewayError::Transport { .. }
            | GatewayError::Credentials { .. }
            | GatewayError::Stream(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal failures whose envelope stops a fallback chain
    pub fn is_gateway_exception(&self) -> bool {
        self.status().is_server_error()
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Routing(_) => "routing_error",
            GatewayError::Build(_) | GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::UnknownProvider(_) | GatewayError::Config(_) => "configuration_error",
            GatewayError::SchemaValidation { .. } => "schema_validation_error",
            GatewayError::Transport { .. } => "transport_error",
            GatewayError::Credentials { .. } => "credentials_error",
            GatewayError::Stream(_) | GatewayError::Internal(_) => "gateway_error",
        }
    }

    /// Render this error as a canonical error response
    pub fn into_response(self, provider: Option<&str>) -> GatewayResponse {
        let status = self.status();
        let exception = self.is_gateway_exception();
        let envelope = CanonicalError::new(
            self.to_string(),
            Some(self.error_type().to_string()),
            provider.unwrap_or("relaygate"),
            status.as_u16(),
        );
        let mut response = GatewayResponse::json(status, envelope.to_value());
        response.meta.provider = provider.map(str::to_string);
        response.meta.gateway_exception = exception;
        response
    }
}
