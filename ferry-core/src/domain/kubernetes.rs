//! Kubernetes executor settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_IMAGE: &str = "docker.io/alpine:latest";

/// Settings for running jobs as pods in a Kubernetes cluster
///
/// `host` and the certificate triple are both optional; with neither set the
/// runner falls back to in-cluster discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Cluster API server (e.g., "https://10.0.0.1:6443")
    #[serde(default)]
    pub host: Option<String>,

    /// Client certificate for file based auth
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Client key for file based auth
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// CA bundle for file based auth
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Namespace job pods are created in
    pub namespace: String,

    /// Image used for the build container
    pub image: String,

    /// CPU limit (e.g., "500m"); empty means no limit
    #[serde(default)]
    pub cpus: String,

    /// Memory limit (e.g., "512Mi"); empty means no limit
    #[serde(default)]
    pub memory: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            host: None,
            cert_file: None,
            key_file: None,
            ca_file: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            cpus: String::new(),
            memory: String::new(),
        }
    }
}
