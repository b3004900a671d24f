//! Runner DTOs
//!
//! Data transfer objects for runner registration and lifecycle.

use serde::{Deserialize, Serialize};

/// Request to register a new runner with the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerRequest {
    /// Registration token issued by the coordinator
    pub token: String,

    /// Human readable runner description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Comma separated tag list
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag_list: String,
}

/// Coordinator response to a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerResponse {
    /// Token the runner authenticates with from now on
    pub token: String,
}

/// Request carrying only a runner token (verify, delete)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerTokenRequest {
    pub token: String,
}
