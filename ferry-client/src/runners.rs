//! Runner lifecycle endpoints

use ferry_core::dto::runner::{RegisterRunnerRequest, RegisterRunnerResponse, RunnerTokenRequest};
use reqwest::{Method, StatusCode};
use tracing::{error, info, warn};

use crate::error::{ClientError, Result};
use crate::{CoordinatorClient, Trusted};

impl CoordinatorClient {
    // =============================================================================
    // Runner Registration
    // =============================================================================

    /// Register a new runner using the client's registration token
    ///
    /// # Arguments
    /// * `description` - Human readable runner description
    /// * `tags` - Tags the runner accepts jobs for
    ///
    /// # Returns
    /// The token the new runner authenticates with
    pub async fn register_runner(
        &mut self,
        description: &str,
        tags: &[String],
    ) -> Result<Trusted<RegisterRunnerResponse>> {
        let request = RegisterRunnerRequest {
            token: self.token.clone(),
            description: description.to_string(),
            tag_list: tags.join(","),
        };

        let mut registered: Option<RegisterRunnerResponse> = None;
        let res = self
            .do_json(
                "runners/register.json",
                Method::POST,
                StatusCode::CREATED,
                Some(&request),
                Some(&mut registered),
            )
            .await
            .into_result()?;

        match res.status_code {
            201 => {
                info!("Registering runner... succeeded");
                let value = registered.ok_or_else(|| {
                    ClientError::api_error(201, "registration response carried no token")
                })?;
                Ok(Trusted {
                    value,
                    ca_chain: res.ca_chain,
                })
            }
            403 => {
                error!("Registering runner... forbidden (check registration token)");
                Err(ClientError::api_error(403, res.status_text))
            }
            status => {
                error!(status = %res.status_text, "Registering runner... failed");
                Err(ClientError::api_error(status as u16, res.status_text))
            }
        }
    }

    /// Check whether a runner token is still accepted
    ///
    /// # Returns
    /// `true` when the coordinator knows the token, `false` when it rejects it
    pub async fn verify_runner(&mut self, token: &str) -> Result<Trusted<bool>> {
        let request = RunnerTokenRequest {
            token: token.to_string(),
        };

        let res = self
            .do_json::<_, ()>(
                "runners/verify.json",
                Method::POST,
                StatusCode::OK,
                Some(&request),
                None,
            )
            .await
            .into_result()?;

        let value = match res.status_code {
            200 => {
                info!("Verifying runner... is alive");
                true
            }
            403 => {
                warn!("Verifying runner... is removed");
                false
            }
            status => {
                error!(status = %res.status_text, "Verifying runner... failed");
                return Err(ClientError::api_error(status as u16, res.status_text));
            }
        };

        Ok(Trusted {
            value,
            ca_chain: res.ca_chain,
        })
    }

    /// Remove a runner from the coordinator
    pub async fn delete_runner(&mut self, token: &str) -> Result<Trusted<()>> {
        let request = RunnerTokenRequest {
            token: token.to_string(),
        };

        let res = self
            .do_json::<_, ()>(
                "runners/delete",
                Method::DELETE,
                StatusCode::OK,
                Some(&request),
                None,
            )
            .await
            .into_result()?;

        match res.status_code {
            200 => {
                info!("Deleting runner... succeeded");
                Ok(Trusted {
                    value: (),
                    ca_chain: res.ca_chain,
                })
            }
            status => {
                error!(status = %res.status_text, "Deleting runner... failed");
                Err(ClientError::api_error(status as u16, res.status_text))
            }
        }
    }
}
