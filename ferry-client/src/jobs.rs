//! Job endpoints

use ferry_core::domain::job::JobState;
use ferry_core::dto::job::{GetJobRequest, JobResponse, UpdateJobRequest};
use reqwest::{Method, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::{CoordinatorClient, Trusted};

/// How the coordinator took a job update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateJobOutcome {
    /// Update stored
    Accepted,
    /// Job no longer exists or the runner may not touch it; stop working on it
    Aborted,
}

impl CoordinatorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Ask the coordinator for the next pending job
    ///
    /// # Returns
    /// `Some(job)` when one was assigned, `None` when the queue is empty
    pub async fn request_job(&mut self) -> Result<Trusted<Option<JobResponse>>> {
        let request = GetJobRequest {
            token: self.token.clone(),
        };

        let mut job: Option<JobResponse> = None;
        let res = self
            .do_json(
                "builds/register.json",
                Method::POST,
                StatusCode::CREATED,
                Some(&request),
                Some(&mut job),
            )
            .await
            .into_result()?;

        match res.status_code {
            201 => {
                if let Some(job) = &job {
                    info!(job_id = job.id, "Checking for jobs... received");
                }
            }
            204 => debug!("Checking for jobs... nothing"),
            403 => {
                error!("Checking for jobs... forbidden");
                return Err(ClientError::api_error(403, res.status_text));
            }
            status => {
                warn!(status = %res.status_text, "Checking for jobs... failed");
                return Err(ClientError::api_error(status as u16, res.status_text));
            }
        }

        Ok(Trusted {
            value: job,
            ca_chain: res.ca_chain,
        })
    }

    /// Report a job's state and optional trace
    ///
    /// # Arguments
    /// * `job_id` - The job being updated
    /// * `job_token` - The per-job token from [`JobResponse::token`]
    /// * `state` - The new state
    /// * `trace` - Full job output so far
    pub async fn update_job(
        &mut self,
        job_id: u64,
        job_token: &str,
        state: JobState,
        trace: Option<String>,
    ) -> Result<Trusted<UpdateJobOutcome>> {
        let request = UpdateJobRequest {
            token: job_token.to_string(),
            state,
            trace,
        };

        let res = self
            .do_json::<_, ()>(
                &format!("builds/{job_id}.json"),
                Method::PUT,
                StatusCode::OK,
                Some(&request),
                None,
            )
            .await
            .into_result()?;

        let value = match res.status_code {
            200 => {
                debug!(job_id, %state, "Submitting job to coordinator... ok");
                UpdateJobOutcome::Accepted
            }
            404 => {
                warn!(job_id, "Submitting job to coordinator... aborted");
                UpdateJobOutcome::Aborted
            }
            403 => {
                error!(job_id, "Submitting job to coordinator... forbidden");
                UpdateJobOutcome::Aborted
            }
            status => {
                warn!(job_id, status = %res.status_text, "Submitting job to coordinator... failed");
                return Err(ClientError::api_error(status as u16, res.status_text));
            }
        };

        Ok(Trusted {
            value,
            ca_chain: res.ca_chain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientOptions;
    use ferry_core::domain::runner::RunnerCredentials;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CoordinatorClient {
        CoordinatorClient::new(
            &RunnerCredentials::new(server.uri(), "runner-token"),
            ClientOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_job_received() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ci/api/v1/builds/register.json"))
            .and(body_json(json!({"token": "runner-token"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42,
                "token": "job-token",
                "commands": "make test",
                "variables": [{"key": "CI", "value": "true"}]
            })))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let job = client.request_job().await.unwrap().value.unwrap();

        assert_eq!(job.id, 42);
        assert_eq!(job.token, "job-token");
        assert_eq!(job.variables.len(), 1);
    }

    #[tokio::test]
    async fn test_request_job_nothing_queued() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        assert!(client.request_job().await.unwrap().value.is_none());
    }

    #[tokio::test]
    async fn test_request_job_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let err = client.request_job().await.unwrap_err();
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn test_update_job() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/ci/api/v1/builds/42.json"))
            .and(body_json(json!({"token": "job-token", "state": "success", "trace": "done"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let outcome = client
            .update_job(42, "job-token", JobState::Success, Some("done".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.value, UpdateJobOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_update_missing_job_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let outcome = client
            .update_job(7, "job-token", JobState::Running, None)
            .await
            .unwrap();
        assert_eq!(outcome.value, UpdateJobOutcome::Aborted);
    }
}
