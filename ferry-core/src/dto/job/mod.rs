//! Job DTOs for coordinator communication

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobState, JobVariable};

/// Request for the next pending job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobRequest {
    pub token: String,
}

/// A job handed out by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: u64,
    /// Per-job token used for job updates
    pub token: String,
    #[serde(default)]
    pub project_id: u64,
    #[serde(default)]
    pub repo_url: String,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub sha: String,
    /// Newline separated script
    #[serde(default)]
    pub commands: String,
    #[serde(default)]
    pub variables: Vec<JobVariable>,
}

/// Job state update sent by the runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    pub token: String,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}
