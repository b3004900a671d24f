//! Job pod management
//!
//! Handles the pod lifecycle for one job:
//! - Building the pod spec from the job and executor settings
//! - Submitting it and waiting for it to run and terminate
//! - Collecting the build container's output
//! - Deleting the pod afterwards

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use ferry_core::domain::kubernetes::KubernetesConfig;
use ferry_core::dto::job::JobResponse;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api;
use kube::api::{DeleteParams, LogParams, PostParams};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resources::{self, ResourceLimits, ResourceParseError};
use super::waiter::{self, KubePodStatus, PodHandle, PodPhase, PodStatusSource, WaitError};

pub const BUILD_CONTAINER: &str = "build";
pub const JOB_LABEL: &str = "ferry.io/job-id";

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to create pod: {0}")]
    Create(#[source] kube::Error),

    #[error("created pod has no name")]
    Unnamed,

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl ExecutorError {
    /// Phase to report for a job that ended with this error
    pub fn phase(&self) -> PodPhase {
        match self {
            ExecutorError::Wait(e) => e.phase(),
            ExecutorError::Create(_) | ExecutorError::Unnamed => PodPhase::Unknown,
        }
    }
}

/// Runs jobs as pods in one namespace
pub struct KubernetesExecutor {
    client: kube::Client,
    config: KubernetesConfig,
    limits: ResourceLimits,
}

impl KubernetesExecutor {
    /// Validates the configured limits up front so a bad value fails at startup
    pub fn new(client: kube::Client, config: KubernetesConfig) -> Result<Self, ResourceParseError> {
        let limits = resources::limits(&config.cpus, &config.memory)?;
        Ok(Self {
            client,
            config,
            limits,
        })
    }

    /// Runs one job to completion
    ///
    /// Progress lines and the build output are appended to `trace`. The pod is
    /// deleted once it was created, whatever the outcome.
    pub async fn run(
        &self,
        job: &JobResponse,
        cancel: &CancellationToken,
        trace: &mut Vec<u8>,
    ) -> Result<PodPhase, ExecutorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let spec = build_pod(job, &self.config, &self.limits);

        let created = pods
            .create(&PostParams::default(), &spec)
            .await
            .map_err(ExecutorError::Create)?;
        let name = created.metadata.name.ok_or(ExecutorError::Unnamed)?;
        let pod = PodHandle::new(self.config.namespace.clone(), name);
        info!(job_id = job.id, %pod, "Created job pod");

        let source: Arc<dyn PodStatusSource> = Arc::new(KubePodStatus::new(self.client.clone()));
        let result = watch(cancel, source, &pod, trace).await;

        let terminated = match &result {
            Ok(_) => true,
            Err(e) => matches!(e.phase(), PodPhase::Succeeded | PodPhase::Failed),
        };
        if terminated {
            self.collect_logs(&pods, &pod, trace).await;
        }
        self.cleanup(&pods, &pod).await;

        result
    }

    async fn collect_logs(&self, pods: &Api<Pod>, pod: &PodHandle, trace: &mut Vec<u8>) {
        let params = LogParams {
            container: Some(BUILD_CONTAINER.to_string()),
            ..LogParams::default()
        };

        match pods.logs(&pod.name, &params).await {
            Ok(output) => {
                if let Err(e) = trace.write_all(output.as_bytes()) {
                    warn!(%pod, error = %e, "Failed to append build output");
                }
            }
            Err(e) => warn!(%pod, error = %e, "Failed to fetch build output"),
        }
    }

    async fn cleanup(&self, pods: &Api<Pod>, pod: &PodHandle) {
        match pods.delete(&pod.name, &DeleteParams::default()).await {
            Ok(_) => debug!(%pod, "Deleted job pod"),
            Err(e) => warn!(%pod, error = %e, "Failed to delete job pod"),
        }
    }
}

async fn watch(
    cancel: &CancellationToken,
    source: Arc<dyn PodStatusSource>,
    pod: &PodHandle,
    trace: &mut Vec<u8>,
) -> Result<PodPhase, ExecutorError> {
    waiter::wait_for_pod_running(cancel, Arc::clone(&source), pod, trace).await?;
    let phase = waiter::wait_for_pod_completion(cancel, source, pod).await?;
    Ok(phase)
}

/// Builds the pod spec for a job
pub fn build_pod(job: &JobResponse, config: &KubernetesConfig, limits: &ResourceLimits) -> Pod {
    let resources = (!limits.is_empty()).then(|| ResourceRequirements {
        limits: Some(limits.to_resource_list()),
        ..ResourceRequirements::default()
    });

    let container = Container {
        name: BUILD_CONTAINER.to_string(),
        image: Some(config.image.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![job.commands.clone()]),
        env: Some(resources::to_env_vars(&job.variables)),
        resources,
        ..Container::default()
    };

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("ferry-job-{}-", job.id)),
            namespace: Some(config.namespace.clone()),
            labels: Some(BTreeMap::from([(JOB_LABEL.to_string(), job.id.to_string())])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}
