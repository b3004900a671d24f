//! Job poller
//!
//! Asks the coordinator for a job every poll interval and runs each job in its
//! own task. Every call hands back a trust chain, which is persisted to the
//! client's CA file so later connections can verify the coordinator.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ferry_client::{CoordinatorClient, UpdateJobOutcome, persist_ca_chain};
use ferry_core::domain::job::JobState;
use ferry_core::dto::job::JobResponse;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::kubernetes::PodPhase;
use crate::kubernetes::executor::{ExecutorError, KubernetesExecutor};

/// Runs a job and reports the phase its pod ended in
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        job: &JobResponse,
        cancel: &CancellationToken,
        trace: &mut Vec<u8>,
    ) -> Result<PodPhase, ExecutorError>;
}

#[async_trait]
impl JobExecutor for KubernetesExecutor {
    async fn execute(
        &self,
        job: &JobResponse,
        cancel: &CancellationToken,
        trace: &mut Vec<u8>,
    ) -> Result<PodPhase, ExecutorError> {
        self.run(job, cancel, trace).await
    }
}

/// Coordinator client shared by the poll loop and the job tasks
pub type SharedClient = Arc<Mutex<CoordinatorClient>>;

/// Job poller that continuously polls for and executes jobs
pub struct JobPoller {
    config: Config,
    client: SharedClient,
    executor: Arc<dyn JobExecutor>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(config: Config, client: SharedClient, executor: Arc<dyn JobExecutor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            executor,
            semaphore,
        }
    }

    /// Polls until `cancel` fires, then waits for running jobs to wind down
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, max parallel jobs: {})",
            self.config.poll_interval, self.config.max_parallel_jobs
        );

        let mut interval = time::interval(self.config.poll_interval);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    warn!("Job task panicked: {}", e);
                }
            }

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!("Max parallel jobs reached, skipping poll");
                continue;
            };

            match poll_once(&self.client).await {
                Ok(Some(job)) => {
                    tasks.spawn(process_job(
                        Arc::clone(&self.client),
                        Arc::clone(&self.executor),
                        job,
                        cancel.clone(),
                        permit,
                    ));
                }
                Ok(None) => {}
                Err(e) => error!("Error during poll cycle: {:#}", e),
            }
        }

        info!("Waiting for {} running job(s) to finish", tasks.len());
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                warn!("Job task panicked: {}", e);
            }
        }

        Ok(())
    }
}

/// Asks the coordinator for one job
pub async fn poll_once(client: &SharedClient) -> Result<Option<JobResponse>> {
    let mut client = client.lock().await;
    let received = client
        .request_job()
        .await
        .context("Failed to request a job")?;
    store_chain(&client, &received.ca_chain);
    Ok(received.value)
}

/// Runs one job and reports its final state
///
/// Returns the state that was reported, or `None` when the coordinator aborted
/// the job before it started.
pub async fn process_job(
    client: SharedClient,
    executor: Arc<dyn JobExecutor>,
    job: JobResponse,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) -> Option<JobState> {
    info!(job_id = job.id, "Starting execution of job");

    match update(&client, &job, JobState::Running, None).await {
        Ok(UpdateJobOutcome::Accepted) => {}
        Ok(UpdateJobOutcome::Aborted) => {
            warn!(job_id = job.id, "Job was aborted before it started");
            return None;
        }
        Err(e) => {
            error!(job_id = job.id, "Failed to mark job as running: {:#}", e);
            return None;
        }
    }

    let mut trace = Vec::new();
    let phase = match executor.execute(&job, &cancel, &mut trace).await {
        Ok(phase) => phase,
        Err(e) => {
            trace.extend_from_slice(format!("ERROR: {e}\n").as_bytes());
            e.phase()
        }
    };

    let state = match phase {
        PodPhase::Succeeded => JobState::Success,
        _ => JobState::Failed,
    };
    info!(job_id = job.id, %phase, %state, "Job finished");

    let trace = String::from_utf8_lossy(&trace).into_owned();
    if let Err(e) = update(&client, &job, state, Some(trace)).await {
        error!(job_id = job.id, "Failed to report job result: {:#}", e);
    }

    Some(state)
}

async fn update(
    client: &SharedClient,
    job: &JobResponse,
    state: JobState,
    trace: Option<String>,
) -> Result<UpdateJobOutcome> {
    let mut client = client.lock().await;
    let updated = client
        .update_job(job.id, &job.token, state, trace)
        .await
        .with_context(|| format!("Failed to update job {} to {}", job.id, state))?;
    store_chain(&client, &updated.ca_chain);
    Ok(updated.value)
}

fn store_chain(client: &CoordinatorClient, chain: &str) {
    let Some(path) = client.transport().ca_file() else {
        return;
    };

    match persist_ca_chain(path, chain) {
        Ok(true) => info!(file = %path.display(), "Stored coordinator CA chain"),
        Ok(false) => {}
        Err(e) => warn!(file = %path.display(), error = %e, "Failed to store coordinator CA chain"),
    }
}
