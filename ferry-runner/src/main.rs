//! Ferry Runner
//!
//! A CI job-execution agent that runs coordinator jobs as Kubernetes pods.
//!
//! Architecture:
//! - Configuration: Load settings from the environment
//! - Client: HTTP communication with the coordinator (ferry-client)
//! - Kubernetes: Cluster connection, pod specs and pod lifecycle waits
//! - Scheduler: Job polling and lifecycle management
//!
//! The runner polls the coordinator for jobs, runs each one in a transient
//! pod, and reports the final state together with the build output.

mod config;
mod kubernetes;
mod scheduler;
mod shutdown;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::kubernetes::KubernetesExecutor;
use crate::scheduler::{JobExecutor, JobPoller};
use ferry_client::{CoordinatorClient, persist_ca_chain};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_runner=info,ferry_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A TLS crypto provider was already installed");
    }

    info!("Starting Ferry Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: coordinator_url={}, namespace={}",
        config.credentials.url, config.kubernetes.namespace
    );

    let mut client = CoordinatorClient::new(&config.credentials, config.client_options())
        .context("Failed to create coordinator client")?;
    info!("Coordinator client initialized ({})", client.base_url());

    verify_runner(&mut client, &config).await?;

    let cluster = kubernetes::get_config(&config.kubernetes)
        .context("Failed to resolve cluster connection")?;
    let kube_client = kubernetes::connect(cluster).context("Failed to connect to cluster")?;
    let executor: Arc<dyn JobExecutor> = Arc::new(
        KubernetesExecutor::new(kube_client, config.kubernetes.clone())
            .context("Invalid Kubernetes resource limits")?,
    );
    info!("Kubernetes executor initialized");

    let shutdown =
        shutdown::install_shutdown_handler().context("Failed to install signal handlers")?;

    let poller = JobPoller::new(config, Arc::new(Mutex::new(client)), executor);

    info!("Starting job polling loop");
    if let Err(e) = poller.run(shutdown).await {
        error!("Poller error: {:#}", e);
        return Err(e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

/// Checks the runner token once at startup
///
/// A rejected token is fatal. Network or server trouble is only logged, the
/// poll loop keeps retrying anyway.
async fn verify_runner(client: &mut CoordinatorClient, config: &Config) -> Result<()> {
    match client.verify_runner(&config.credentials.token).await {
        Ok(verified) => {
            if let Some(path) = client.transport().ca_file() {
                if let Err(e) = persist_ca_chain(path, &verified.ca_chain) {
                    warn!(file = %path.display(), error = %e, "Failed to store coordinator CA chain");
                }
            }

            if !verified.value {
                anyhow::bail!("Runner token was rejected by the coordinator");
            }
            Ok(())
        }
        Err(e) => {
            warn!("Failed to verify runner: {}", e);
            Ok(())
        }
    }
}
