//! Ferry Coordinator Client
//!
//! HTTP client for the coordinator's JSON runner API.
//!
//! The client owns an adaptive TLS transport (see [`transport`]) that is
//! rebuilt whenever the CA file changes on disk, and every call returns the
//! trust chain the connection was verified with so the runner can persist it.
//!
//! Failures never panic: [`CoordinatorClient::do_json`] folds client-side
//! failures into a negative status code, and the typed endpoints return
//! [`ClientError`] values.
//!
//! # Example
//!
//! ```no_run
//! use ferry_client::{ClientOptions, CoordinatorClient};
//! use ferry_core::domain::runner::RunnerCredentials;
//!
//! #[tokio::main]
//! async fn main() -> ferry_client::Result<()> {
//!     let credentials = RunnerCredentials::new("https://ci.example.com/", "runner-token");
//!     let mut client = CoordinatorClient::new(&credentials, ClientOptions::default())?;
//!
//!     if let Some(job) = client.request_job().await?.value {
//!         println!("Received job {}", job.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod error;
mod jobs;
mod runners;
pub mod transport;
mod verifier;

// Re-export commonly used types
pub use chain::{ConnectionState, get_ca_chain, persist_ca_chain, verified_path};
pub use error::{ClientError, Result};
pub use jobs::UpdateJobOutcome;

use std::path::PathBuf;
use std::time::Duration;

use ferry_core::domain::runner::RunnerCredentials;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::tls::TlsInfo;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::transport::TransportTrust;

/// Path segment every coordinator URL ends with
pub const CI_SUFFIX: &str = "/ci";

/// Versioned API prefix appended to the normalized URL
pub const API_PREFIX: &str = "api/v1/";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Client identification sent with every request body
pub const CLIENT_USER_AGENT: &str = concat!("ferry-runner/", env!("CARGO_PKG_VERSION"));

/// Normalizes a coordinator URL so it ends with exactly one `/ci`
///
/// Trailing slashes are stripped first; applying this twice is a no-op.
pub fn fix_ci_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with(CI_SUFFIX) {
        url.to_string()
    } else {
        format!("{url}{CI_SUFFIX}")
    }
}

/// Transport options chosen by the caller
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Accept any server certificate. Enabled unless the caller opts out.
    pub skip_verify: bool,
    /// Directory holding per-host CA files named `<host>.crt`
    pub certificate_directory: Option<PathBuf>,
    /// TCP dial timeout, also used as the keep-alive interval
    pub connect_timeout: Duration,
    pub tls_handshake_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            skip_verify: true,
            certificate_directory: None,
            connect_timeout: Duration::from_secs(30),
            tls_handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a JSON call
///
/// `status_code` is the HTTP status of the received response, or `-1` when the
/// call failed on the client side. In that case `failure` holds the cause and
/// `status_text` its message.
#[derive(Debug)]
pub struct ApiResponse {
    pub status_code: i32,
    pub status_text: String,
    /// PEM chain the connection was trusted with
    pub ca_chain: String,
    pub failure: Option<ClientError>,
}

impl ApiResponse {
    fn failed(error: ClientError) -> Self {
        debug!(error = %error, "Coordinator call failed on the client side");
        Self {
            status_code: -1,
            status_text: error.to_string(),
            ca_chain: String::new(),
            failure: Some(error),
        }
    }

    pub fn is_client_failure(&self) -> bool {
        self.status_code < 0
    }

    /// Converts client-side failures into errors, passing responses through
    fn into_result(self) -> Result<Self> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// A value returned by the coordinator together with its trust chain
#[derive(Debug, Clone)]
pub struct Trusted<T> {
    pub value: T,
    pub ca_chain: String,
}

/// HTTP client for the coordinator API
///
/// Not internally synchronized: calls take `&mut self` because they may
/// replace the transport. Share it behind a mutex when several tasks need it.
#[derive(Debug)]
pub struct CoordinatorClient {
    /// Normalized base URL, ending in `/ci/api/v1/`
    url: Url,
    /// Runner token used by the typed endpoints
    token: String,
    transport: TransportTrust,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// Fails with [`ClientError::Config`] when the URL does not parse or its
    /// scheme is neither http nor https. No network call is made.
    pub fn new(credentials: &RunnerCredentials, options: ClientOptions) -> Result<Self> {
        let raw = format!("{}/{}", fix_ci_url(&credentials.url), API_PREFIX);
        let url = Url::parse(&raw)
            .map_err(|e| ClientError::Config(format!("invalid coordinator URL {raw}: {e}")))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(
                "only http or https scheme supported".to_string(),
            ));
        }

        let ca_file = credentials.tls_ca_file.clone().or_else(|| {
            let directory = options.certificate_directory.as_ref()?;
            let host = url.host_str()?;
            Some(directory.join(format!("{host}.crt")))
        });

        let transport = TransportTrust::new(
            ca_file,
            options.skip_verify,
            options.connect_timeout,
            options.tls_handshake_timeout,
        );

        Ok(Self {
            url,
            token: credentials.token.clone(),
            transport,
        })
    }

    /// Get the normalized base URL
    pub fn base_url(&self) -> &Url {
        &self.url
    }

    pub fn transport(&self) -> &TransportTrust {
        &self.transport
    }

    /// Sends a raw request relative to the base URL
    ///
    /// Content type and user agent are set only when a body is present.
    pub async fn do_request(
        &mut self,
        path: &str,
        method: Method,
        body: Option<Vec<u8>>,
        content_type: &str,
        headers: HeaderMap,
    ) -> Result<reqwest::Response> {
        let url = self
            .url
            .join(path)
            .map_err(|e| ClientError::Request(format!("failed to resolve {path}: {e}")))?;

        let client = self.transport.ensure()?;

        let mut request = client.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            let content_type = HeaderValue::from_str(content_type)
                .map_err(|e| ClientError::Request(format!("invalid content type: {e}")))?;
            request = request
                .header(CONTENT_TYPE, content_type)
                .header(USER_AGENT, CLIENT_USER_AGENT)
                .body(body);
        }

        debug!(%method, %url, "Sending request");

        request
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                method,
                url: url.to_string(),
                source,
            })
    }

    /// Performs a JSON call
    ///
    /// `request` is serialized when given. When the response status equals
    /// `expected` and a `response` target is given, the body must be
    /// `application/json` and is decoded into the target. Any other status is
    /// returned as-is for the caller to interpret.
    pub async fn do_json<Req, Resp>(
        &mut self,
        path: &str,
        method: Method,
        expected: StatusCode,
        request: Option<&Req>,
        response: Option<&mut Resp>,
    ) -> ApiResponse
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = match request.map(serde_json::to_vec).transpose() {
            Ok(body) => body,
            Err(e) => return ApiResponse::failed(ClientError::Encode(e)),
        };

        let mut headers = HeaderMap::new();
        if response.is_some() {
            headers.insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }

        let res = match self
            .do_request(path, method, body, JSON_CONTENT_TYPE, headers)
            .await
        {
            Ok(res) => res,
            Err(e) => return ApiResponse::failed(e),
        };

        let status = res.status();
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let tls_state = res
            .extensions()
            .get::<TlsInfo>()
            .is_some()
            .then(|| self.transport.connection_state());

        // Read the whole body so the connection goes back to the pool
        let payload = res.bytes().await;

        if status == expected {
            if let Some(target) = response {
                if content_type != JSON_CONTENT_TYPE {
                    return ApiResponse::failed(ClientError::Protocol(content_type));
                }

                let payload = match payload {
                    Ok(payload) => payload,
                    Err(e) => return ApiResponse::failed(ClientError::ResponseBody(e)),
                };

                match serde_json::from_slice(&payload) {
                    Ok(value) => *target = value,
                    Err(e) => return ApiResponse::failed(ClientError::Decode(e)),
                }
            }
        } else if let Err(e) = payload {
            debug!(error = %e, "Failed to drain response body");
        }

        ApiResponse {
            status_code: i32::from(status.as_u16()),
            status_text: status.to_string(),
            ca_chain: self.transport.ca_chain(tls_state.as_ref()),
            failure: None,
        }
    }
}
