//! Runner configuration
//!
//! Defines all configurable parameters for the runner including
//! coordinator credentials, TLS trust settings, polling and the
//! Kubernetes executor.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_client::ClientOptions;
use ferry_core::domain::kubernetes::KubernetesConfig;
use ferry_core::domain::runner::RunnerCredentials;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordinator URL, runner token and optional CA file
    pub credentials: RunnerCredentials,

    /// Directory where per-host CA files are kept (`<host>.crt`)
    pub certificate_directory: Option<PathBuf>,

    /// Accept any coordinator certificate
    pub tls_skip_verify: bool,

    /// How often to ask the coordinator for a job
    pub poll_interval: Duration,

    /// Max parallel jobs the runner can handle
    pub max_parallel_jobs: usize,

    pub kubernetes: KubernetesConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(coordinator_url: String, token: String) -> Self {
        Self {
            credentials: RunnerCredentials::new(coordinator_url, token),
            certificate_directory: None,
            tls_skip_verify: true,
            poll_interval: Duration::from_secs(3),
            max_parallel_jobs: 1,
            kubernetes: KubernetesConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - COORDINATOR_URL (required)
    /// - RUNNER_TOKEN (required)
    /// - TLS_CA_FILE (optional)
    /// - CERTIFICATE_DIRECTORY (optional)
    /// - TLS_SKIP_VERIFY (optional, default: true)
    /// - POLL_INTERVAL (optional, seconds, default: 3)
    /// - MAX_PARALLEL_JOBS (optional, default: 1)
    /// - KUBERNETES_HOST, KUBERNETES_CERT_FILE, KUBERNETES_KEY_FILE,
    ///   KUBERNETES_CA_FILE (optional, cluster access)
    /// - KUBERNETES_NAMESPACE (optional, default: default)
    /// - KUBERNETES_IMAGE (optional, default: docker.io/alpine:latest)
    /// - KUBERNETES_CPUS, KUBERNETES_MEMORY (optional, limits)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let coordinator_url = get("COORDINATOR_URL")
            .ok_or_else(|| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;
        let token = get("RUNNER_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("RUNNER_TOKEN environment variable not set"))?;

        let mut config = Self::new(coordinator_url, token);
        config.credentials.tls_ca_file = get("TLS_CA_FILE").map(PathBuf::from);
        config.certificate_directory = get("CERTIFICATE_DIRECTORY").map(PathBuf::from);

        if let Some(value) = get("TLS_SKIP_VERIFY") {
            config.tls_skip_verify = parse_bool(&value)
                .with_context(|| format!("TLS_SKIP_VERIFY must be a boolean, got {value:?}"))?;
        }

        if let Some(value) = get("POLL_INTERVAL") {
            let seconds: u64 = value
                .parse()
                .with_context(|| format!("POLL_INTERVAL must be a number of seconds, got {value:?}"))?;
            config.poll_interval = Duration::from_secs(seconds);
        }

        if let Some(value) = get("MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = value
                .parse()
                .with_context(|| format!("MAX_PARALLEL_JOBS must be a number, got {value:?}"))?;
        }

        let kubernetes = &mut config.kubernetes;
        kubernetes.host = get("KUBERNETES_HOST");
        kubernetes.cert_file = get("KUBERNETES_CERT_FILE").map(PathBuf::from);
        kubernetes.key_file = get("KUBERNETES_KEY_FILE").map(PathBuf::from);
        kubernetes.ca_file = get("KUBERNETES_CA_FILE").map(PathBuf::from);
        if let Some(namespace) = get("KUBERNETES_NAMESPACE") {
            kubernetes.namespace = namespace;
        }
        if let Some(image) = get("KUBERNETES_IMAGE") {
            kubernetes.image = image;
        }
        kubernetes.cpus = get("KUBERNETES_CPUS").unwrap_or_default();
        kubernetes.memory = get("KUBERNETES_MEMORY").unwrap_or_default();

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.credentials.token.is_empty() {
            anyhow::bail!("runner token cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.kubernetes.namespace.is_empty() {
            anyhow::bail!("kubernetes namespace cannot be empty");
        }

        if self.kubernetes.image.is_empty() {
            anyhow::bail!("kubernetes image cannot be empty");
        }

        Ok(())
    }

    /// Transport options for the coordinator client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            skip_verify: self.tls_skip_verify,
            certificate_directory: self.certificate_directory.clone(),
            ..ClientOptions::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| env.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("COORDINATOR_URL", "https://ci.example.com"),
        ("RUNNER_TOKEN", "runner-token"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.credentials.url, "https://ci.example.com");
        assert_eq!(config.credentials.token, "runner-token");
        assert!(config.credentials.tls_ca_file.is_none());
        assert!(config.tls_skip_verify);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.max_parallel_jobs, 1);
        assert_eq!(config.kubernetes, KubernetesConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_required_variables() {
        let err = Config::from_lookup(lookup(&[("RUNNER_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("COORDINATOR_URL"));

        let err = Config::from_lookup(lookup(&[
            ("COORDINATOR_URL", "https://ci.example.com"),
            ("RUNNER_TOKEN", "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RUNNER_TOKEN"));
    }

    #[test]
    fn test_reads_all_settings() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("TLS_CA_FILE", "/etc/ferry/ca.crt"),
            ("CERTIFICATE_DIRECTORY", "/etc/ferry/certs"),
            ("TLS_SKIP_VERIFY", "false"),
            ("POLL_INTERVAL", "10"),
            ("MAX_PARALLEL_JOBS", "4"),
            ("KUBERNETES_HOST", "https://10.0.0.1:6443"),
            ("KUBERNETES_CERT_FILE", "/k/client.crt"),
            ("KUBERNETES_KEY_FILE", "/k/client.key"),
            ("KUBERNETES_CA_FILE", "/k/ca.crt"),
            ("KUBERNETES_NAMESPACE", "ci"),
            ("KUBERNETES_IMAGE", "rust:1.85"),
            ("KUBERNETES_CPUS", "500m"),
            ("KUBERNETES_MEMORY", "1Gi"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(
            config.credentials.tls_ca_file,
            Some(PathBuf::from("/etc/ferry/ca.crt"))
        );
        assert!(!config.tls_skip_verify);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.kubernetes.host.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(config.kubernetes.key_file, Some(PathBuf::from("/k/client.key")));
        assert_eq!(config.kubernetes.namespace, "ci");
        assert_eq!(config.kubernetes.image, "rust:1.85");
        assert_eq!(config.kubernetes.cpus, "500m");
        assert_eq!(config.kubernetes.memory, "1Gi");

        let options = config.client_options();
        assert!(!options.skip_verify);
        assert_eq!(
            options.certificate_directory,
            Some(PathBuf::from("/etc/ferry/certs"))
        );
    }

    #[test]
    fn test_rejects_malformed_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("TLS_SKIP_VERIFY", "maybe"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("POLL_INTERVAL", "soon"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("https://ci.example.com".to_string(), "t".to_string());
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.poll_interval = Duration::from_secs(1);
        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());

        config.max_parallel_jobs = 1;
        config.kubernetes.namespace = String::new();
        assert!(config.validate().is_err());
    }
}
