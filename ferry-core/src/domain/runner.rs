//! Runner domain model
//!
//! Credentials a runner uses to talk to its coordinator.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Credentials identifying a runner against a coordinator
///
/// Immutable once a client has been constructed from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCredentials {
    /// Coordinator base URL (e.g., "https://ci.example.com/")
    pub url: String,

    /// Runner authentication token
    pub token: String,

    /// Optional PEM bundle used to verify the coordinator's certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_file: Option<PathBuf>,
}

impl RunnerCredentials {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            tls_ca_file: None,
        }
    }

    /// Sets the CA file used for TLS verification
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_file = Some(path.into());
        self
    }
}
