//! Cluster connection resolver
//!
//! Exactly one of three strategies applies, in this order:
//! 1. file based auth when a client certificate is configured
//! 2. a bare host when one is configured
//! 3. in-cluster discovery from the mounted service account

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferry_core::domain::kubernetes::KubernetesConfig;
use http::Uri;
use kube::config::InClusterError;
use thiserror::Error;
use tracing::debug;

/// Default connection timeout for kube clients
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default read timeout for kube clients
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Host used for file based auth when none is configured
const DEFAULT_HOST: &str = "localhost";

/// Errors resolving or opening a cluster connection
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Settings are incomplete or malformed
    #[error("{0}")]
    Config(String),

    /// CA bundle for file based auth could not be read
    #[error("failed to read CA file {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// In-cluster discovery failed
    #[error(transparent)]
    InCluster(#[from] InClusterError),

    /// Client could not be created from the resolved config
    #[error("failed to create client: {0}")]
    Client(#[from] kube::Error),
}

/// The credential strategy selected for a [`KubernetesConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// Client certificate, key and CA files
    Certificate {
        host: String,
        cert_file: PathBuf,
        key_file: PathBuf,
        ca_file: PathBuf,
    },
    /// Host only, no transport security material from this layer
    Host { host: String },
    /// Service account token and CA mounted into the pod
    InCluster,
}

/// Picks the connection strategy without touching the filesystem
pub fn select_strategy(config: &KubernetesConfig) -> Result<ConnectionStrategy, ClusterError> {
    if let Some(cert_file) = &config.cert_file {
        let mut missing = Vec::new();
        if config.key_file.is_none() {
            missing.push("key_file");
        }
        if config.ca_file.is_none() {
            missing.push("ca_file");
        }

        return match (&config.key_file, &config.ca_file) {
            (Some(key_file), Some(ca_file)) => Ok(ConnectionStrategy::Certificate {
                host: config
                    .host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
                ca_file: ca_file.clone(),
            }),
            _ => Err(ClusterError::Config(format!(
                "ca file, cert file and key file must be specified when using file based auth (missing: {})",
                missing.join(", ")
            ))),
        };
    }

    if let Some(host) = &config.host {
        return Ok(ConnectionStrategy::Host { host: host.clone() });
    }

    Ok(ConnectionStrategy::InCluster)
}

/// Builds the client config for the selected strategy
///
/// In-cluster discovery errors are returned unchanged.
pub fn get_config(config: &KubernetesConfig) -> Result<kube::Config, ClusterError> {
    match select_strategy(config)? {
        ConnectionStrategy::Certificate {
            host,
            cert_file,
            key_file,
            ca_file,
        } => {
            debug!(%host, "Using file based cluster auth");
            let mut kube_config = kube::Config::new(cluster_url(&host, true)?);
            kube_config.root_cert = Some(load_root_certs(&ca_file)?);
            kube_config.auth_info.client_certificate =
                Some(cert_file.to_string_lossy().into_owned());
            kube_config.auth_info.client_key = Some(key_file.to_string_lossy().into_owned());
            Ok(kube_config)
        }
        ConnectionStrategy::Host { host } => {
            debug!(%host, "Using configured cluster host");
            Ok(kube::Config::new(cluster_url(&host, false)?))
        }
        ConnectionStrategy::InCluster => {
            debug!("Using in-cluster discovery");
            Ok(kube::Config::incluster()?)
        }
    }
}

/// Creates a client from a resolved config
pub fn connect(mut config: kube::Config) -> Result<kube::Client, ClusterError> {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(kube::Client::try_from(config)?)
}

/// Parses a host, defaulting the scheme to https when TLS material is supplied
fn cluster_url(host: &str, secure: bool) -> Result<Uri, ClusterError> {
    let url = if host.contains("://") {
        host.to_string()
    } else if secure {
        format!("https://{host}")
    } else {
        format!("http://{host}")
    };

    url.parse::<Uri>()
        .map_err(|e| ClusterError::Config(format!("invalid cluster host {host}: {e}")))
}

fn load_root_certs(path: &Path) -> Result<Vec<Vec<u8>>, ClusterError> {
    let data = fs::read(path).map_err(|source| ClusterError::CaFile {
        path: path.to_path_buf(),
        source,
    })?;

    let certificates: Vec<Vec<u8>> = pem::parse_many(&data)
        .map_err(|e| ClusterError::Config(format!("invalid CA file {}: {e}", path.display())))?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| block.into_contents())
        .collect();

    if certificates.is_empty() {
        return Err(ClusterError::Config(format!(
            "CA file {} contains no certificates",
            path.display()
        )));
    }

    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_auth(cert: bool, key: bool, ca: bool) -> KubernetesConfig {
        KubernetesConfig {
            host: Some("k8s.example.com:6443".to_string()),
            cert_file: cert.then(|| PathBuf::from("/certs/client.crt")),
            key_file: key.then(|| PathBuf::from("/certs/client.key")),
            ca_file: ca.then(|| PathBuf::from("/certs/ca.crt")),
            ..Default::default()
        }
    }

    #[test]
    fn test_cert_file_alone_names_missing_key_and_ca() {
        let err = select_strategy(&file_auth(true, false, false)).unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));

        let message = err.to_string();
        assert!(message.contains("key_file"));
        assert!(message.contains("ca_file"));
    }

    #[test]
    fn test_cert_and_key_without_ca_names_only_ca() {
        let message = select_strategy(&file_auth(true, true, false))
            .unwrap_err()
            .to_string();
        assert!(message.contains("ca_file"));
        assert!(!message.contains("key_file"));
    }

    #[test]
    fn test_full_triple_selects_certificate_auth() {
        let strategy = select_strategy(&file_auth(true, true, true)).unwrap();
        assert_eq!(
            strategy,
            ConnectionStrategy::Certificate {
                host: "k8s.example.com:6443".to_string(),
                cert_file: PathBuf::from("/certs/client.crt"),
                key_file: PathBuf::from("/certs/client.key"),
                ca_file: PathBuf::from("/certs/ca.crt"),
            }
        );
    }

    #[test]
    fn test_certificate_takes_precedence_over_host_only() {
        // a host is configured too, but the cert file decides
        assert!(select_strategy(&file_auth(true, false, true)).is_err());
    }

    #[test]
    fn test_host_only() {
        let config = KubernetesConfig {
            host: Some("10.0.0.1:8080".to_string()),
            ..Default::default()
        };
        assert_eq!(
            select_strategy(&config).unwrap(),
            ConnectionStrategy::Host {
                host: "10.0.0.1:8080".to_string()
            }
        );

        let kube_config = get_config(&config).unwrap();
        assert_eq!(kube_config.cluster_url.scheme_str(), Some("http"));
        assert_eq!(kube_config.cluster_url.host(), Some("10.0.0.1"));
        assert!(kube_config.root_cert.is_none());
    }

    #[test]
    fn test_host_keeps_explicit_scheme() {
        let config = KubernetesConfig {
            host: Some("https://k8s.example.com".to_string()),
            ..Default::default()
        };
        let kube_config = get_config(&config).unwrap();
        assert_eq!(kube_config.cluster_url.scheme_str(), Some("https"));
    }

    #[test]
    fn test_nothing_configured_uses_in_cluster_discovery() {
        assert_eq!(
            select_strategy(&KubernetesConfig::default()).unwrap(),
            ConnectionStrategy::InCluster
        );
    }

    #[test]
    fn test_file_auth_config_carries_paths_and_ca() {
        let dir = TempDir::new().unwrap();
        let ca_file = dir.path().join("ca.crt");
        let ca = rcgen::generate_simple_self_signed(vec!["k8s.example.com".to_string()]).unwrap();
        fs::write(&ca_file, ca.cert.pem()).unwrap();

        let config = KubernetesConfig {
            host: Some("k8s.example.com:6443".to_string()),
            cert_file: Some(PathBuf::from("/certs/client.crt")),
            key_file: Some(PathBuf::from("/certs/client.key")),
            ca_file: Some(ca_file),
            ..Default::default()
        };

        let kube_config = get_config(&config).unwrap();
        assert_eq!(kube_config.cluster_url.scheme_str(), Some("https"));
        assert_eq!(kube_config.cluster_url.port_u16(), Some(6443));
        assert_eq!(kube_config.root_cert, Some(vec![ca.cert.der().to_vec()]));
        assert_eq!(
            kube_config.auth_info.client_certificate.as_deref(),
            Some("/certs/client.crt")
        );
        assert_eq!(
            kube_config.auth_info.client_key.as_deref(),
            Some("/certs/client.key")
        );
    }

    #[test]
    fn test_file_auth_with_unreadable_ca() {
        let dir = TempDir::new().unwrap();
        let config = KubernetesConfig {
            cert_file: Some(PathBuf::from("/certs/client.crt")),
            key_file: Some(PathBuf::from("/certs/client.key")),
            ca_file: Some(dir.path().join("missing.crt")),
            ..Default::default()
        };

        assert!(matches!(
            get_config(&config),
            Err(ClusterError::CaFile { .. })
        ));
    }
}
