//! Kubernetes executor
//!
//! Runs jobs as transient pods:
//! - Connection: resolve cluster credentials from settings or in-cluster discovery
//! - Resources: parse limit quantities and project job variables into the environment
//! - Waiter: poll a pod's phase until it runs or ends, honoring cancellation
//! - Executor: build, submit, watch and clean up the job pod

pub mod connection;
pub mod executor;
pub mod resources;
pub mod waiter;

pub use connection::{connect, get_config};
pub use executor::KubernetesExecutor;
pub use waiter::PodPhase;
