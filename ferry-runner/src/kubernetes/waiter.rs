//! Pod lifecycle waiter
//!
//! Polls a pod's phase once per second until it is running (or done), racing
//! every status fetch against a cancellation token.
//!
//! Each fetch runs as its own task, so cancellation is observed without
//! waiting for the API server. A fetch still in flight when the token fires is
//! aborted. There is no timeout of its own; callers bound the wait by
//! cancelling.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay between two status fetches
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Maps the API server's phase string; anything unrecognized is `Unknown`
    pub fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Identifies the pod being watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHandle {
    pub namespace: String,
    pub name: String,
}

impl PodHandle {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Why a wait ended without the expected phase
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("pod already succeeded before it begins running")]
    AlreadySucceeded,

    #[error("pod status is failed")]
    Failed,

    #[error("failed to get pod status: {0}")]
    Fetch(#[source] BoxError),

    #[error("pod status task failed: {0}")]
    Task(#[from] JoinError),

    #[error("wait for pod cancelled")]
    Cancelled,
}

impl WaitError {
    /// The phase reported together with this error
    pub fn phase(&self) -> PodPhase {
        match self {
            WaitError::AlreadySucceeded => PodPhase::Succeeded,
            WaitError::Failed => PodPhase::Failed,
            WaitError::Fetch(_) | WaitError::Task(_) | WaitError::Cancelled => PodPhase::Unknown,
        }
    }
}

/// Reads the current phase of a pod
#[async_trait]
pub trait PodStatusSource: Send + Sync {
    async fn pod_phase(&self, pod: &PodHandle) -> Result<PodPhase, BoxError>;
}

/// Status source backed by the cluster API
#[derive(Clone)]
pub struct KubePodStatus {
    client: kube::Client,
}

impl KubePodStatus {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStatusSource for KubePodStatus {
    async fn pod_phase(&self, pod: &PodHandle) -> Result<PodPhase, BoxError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let current = pods.get(&pod.name).await?;
        let phase = current
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref());
        Ok(PodPhase::from_status(phase))
    }
}

/// Waits until the pod is running
///
/// Returns `Ok(Running)` once a fetch reports it. Succeeded and Failed pods,
/// fetch errors and cancellation end the wait with an error whose
/// [`WaitError::phase`] is the phase to report. Every other phase writes one
/// progress line to `out` and polls again after [`POLL_INTERVAL`].
pub async fn wait_for_pod_running<S, W>(
    cancel: &CancellationToken,
    source: Arc<S>,
    pod: &PodHandle,
    out: &mut W,
) -> Result<PodPhase, WaitError>
where
    S: PodStatusSource + ?Sized + 'static,
    W: Write + Send + ?Sized,
{
    loop {
        match fetch_phase(cancel, &source, pod).await? {
            PodPhase::Running => return Ok(PodPhase::Running),
            PodPhase::Succeeded => return Err(WaitError::AlreadySucceeded),
            PodPhase::Failed => return Err(WaitError::Failed),
            phase => {
                if let Err(e) = writeln!(
                    out,
                    "Waiting for pod {pod} to be running, status is {phase}"
                ) {
                    warn!(error = %e, "Failed to write pod progress");
                }
                pause(cancel).await?;
            }
        }
    }
}

/// Waits until a started pod terminates
///
/// Returns `Succeeded` or `Failed`; fetch errors and cancellation end the
/// wait like in [`wait_for_pod_running`].
pub async fn wait_for_pod_completion<S>(
    cancel: &CancellationToken,
    source: Arc<S>,
    pod: &PodHandle,
) -> Result<PodPhase, WaitError>
where
    S: PodStatusSource + ?Sized + 'static,
{
    loop {
        match fetch_phase(cancel, &source, pod).await? {
            phase @ (PodPhase::Succeeded | PodPhase::Failed) => return Ok(phase),
            phase => {
                debug!(%pod, %phase, "Pod still active");
                pause(cancel).await?;
            }
        }
    }
}

/// Issues one status fetch as its own task and races it against cancellation
async fn fetch_phase<S>(
    cancel: &CancellationToken,
    source: &Arc<S>,
    pod: &PodHandle,
) -> Result<PodPhase, WaitError>
where
    S: PodStatusSource + ?Sized + 'static,
{
    if cancel.is_cancelled() {
        return Err(WaitError::Cancelled);
    }

    let source = Arc::clone(source);
    let target = pod.clone();
    let mut fetch = tokio::spawn(async move { source.pod_phase(&target).await });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            fetch.abort();
            Err(WaitError::Cancelled)
        }
        joined = &mut fetch => joined?.map_err(WaitError::Fetch),
    }
}

async fn pause(cancel: &CancellationToken) -> Result<(), WaitError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(POLL_INTERVAL) => Ok(()),
    }
}
