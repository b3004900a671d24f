//! Error types for the Ferry coordinator client

use reqwest::Method;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the coordinator
///
/// None of these abort the caller: the JSON envelope folds every variant
/// into a negative status code, and typed endpoints return them as values.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client configuration is unusable (bad URL, unsupported scheme)
    #[error("{0}")]
    Config(String),

    /// Request could not be built (e.g. the path does not resolve)
    #[error("invalid request: {0}")]
    Request(String),

    /// TLS client configuration could not be assembled
    #[error("failed to configure TLS: {0}")]
    TlsConfig(String),

    /// HTTP transport could not be constructed
    #[error("failed to build HTTP transport: {}", with_causes(.0))]
    TransportSetup(#[source] reqwest::Error),

    /// Dial, TLS handshake or send failure
    ///
    /// The message carries the whole cause chain, so a refused connection, a
    /// rejected certificate and a timeout read differently.
    #[error("couldn't execute {method} against {url}: {}", with_causes(.source))]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Response body could not be read
    #[error("failed to read response body: {0}")]
    ResponseBody(#[source] reqwest::Error),

    /// Response carried an unexpected content type
    #[error("Server should return application/json. Got: {0}")]
    Protocol(String),

    /// Response body is not valid JSON for the expected type
    #[error("Error decoding json payload {0}")]
    Decode(#[source] serde_json::Error),

    /// Request object could not be serialized
    #[error("failed to marshal request object: {0}")]
    Encode(#[source] serde_json::Error),

    /// Coordinator answered with a status the endpoint does not accept
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Status text or explanation
        message: String,
    },
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Check if the failure happened before any response was received
    pub fn is_client_side(&self) -> bool {
        !matches!(self, Self::ApiError { .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}

/// Renders an error followed by every distinct cause, joined with ": "
fn with_causes(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }

    message
}
