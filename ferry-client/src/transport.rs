//! Adaptive TLS transport
//!
//! The transport is built lazily and rebuilt whenever the CA file on disk is
//! newer than the last build. This lets the runner pick up a trust chain it
//! persisted after a previous call without restarting.
//!
//! `TransportTrust` is not internally synchronized. Every mutating method takes
//! `&mut self`; callers sharing a client across tasks must wrap it in a mutex.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use pem::Pem;
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, error};

use crate::chain::{ConnectionState, get_ca_chain};
use crate::error::{ClientError, Result};
use crate::verifier::{AcceptAnyServerCert, ChainRecorder, RecordingVerifier};

/// Transport settings and trust material for one client
#[derive(Debug)]
pub struct TransportTrust {
    ca_file: Option<PathBuf>,
    /// Raw bytes of the last CA bundle that parsed successfully
    ca_data: Option<Vec<u8>>,
    updated_at: Option<SystemTime>,
    skip_verify: bool,
    connect_timeout: Duration,
    tls_handshake_timeout: Duration,
    client: Option<reqwest::Client>,
    recorder: ChainRecorder,
    generation: u64,
}

impl TransportTrust {
    pub fn new(
        ca_file: Option<PathBuf>,
        skip_verify: bool,
        connect_timeout: Duration,
        tls_handshake_timeout: Duration,
    ) -> Self {
        Self {
            ca_file,
            ca_data: None,
            updated_at: None,
            skip_verify,
            connect_timeout,
            tls_handshake_timeout,
            client: None,
            recorder: ChainRecorder::default(),
            generation: 0,
        }
    }

    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }

    pub fn ca_data(&self) -> Option<&[u8]> {
        self.ca_data.as_deref()
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    /// Number of transports built so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the next request has to build a fresh transport
    ///
    /// True when nothing was built yet, or when the CA file's modification time
    /// is strictly newer than the last build.
    pub fn needs_rebuild(&self) -> bool {
        if self.client.is_none() {
            return true;
        }

        match (&self.ca_file, self.updated_at) {
            (Some(file), Some(built_at)) => fs::metadata(file)
                .and_then(|meta| meta.modified())
                .map(|modified| modified > built_at)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Returns a transport that reflects the current CA file
    pub fn ensure(&mut self) -> Result<reqwest::Client> {
        if self.needs_rebuild() {
            self.client = None;
        }

        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        self.updated_at = Some(SystemTime::now());
        let client = self.create()?;
        self.client = Some(client.clone());
        self.generation += 1;
        Ok(client)
    }

    /// Path verified by the most recent TLS handshake of the current transport
    ///
    /// Empty when verification is skipped or no handshake completed yet.
    pub fn connection_state(&self) -> ConnectionState {
        self.recorder.connection_state()
    }

    /// Trust chain to hand back to the caller for a response
    pub fn ca_chain(&self, state: Option<&ConnectionState>) -> String {
        get_ca_chain(self.ca_data(), state)
    }

    fn create(&mut self) -> Result<reqwest::Client> {
        self.recorder = ChainRecorder::default();
        let tls = self.tls_config()?;

        // reqwest's connect timeout spans both the TCP dial and the TLS handshake
        reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(self.connect_timeout + self.tls_handshake_timeout)
            .tcp_keepalive(self.connect_timeout)
            .tls_info(true)
            .build()
            .map_err(ClientError::TransportSetup)
    }

    fn tls_config(&mut self) -> Result<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| ClientError::TlsConfig(e.to_string()))?
            .dangerous();

        if self.skip_verify {
            let verifier = AcceptAnyServerCert::new(provider);
            return Ok(builder
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth());
        }

        let (anchors, roots) = match self.load_ca_file() {
            Some(loaded) => loaded,
            None => {
                let mut anchors = RootCertStore::empty();
                anchors.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                (anchors, Vec::new())
            }
        };

        let verifier = RecordingVerifier::new(anchors, roots, provider, self.recorder.clone())
            .map_err(|e| ClientError::TlsConfig(e.to_string()))?;
        Ok(builder
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth())
    }

    /// Trust anchors from the CA file, plus the DER they came from
    ///
    /// `None` when there is no usable file; the caller falls back to the
    /// bundled public roots.
    fn load_ca_file(&mut self) -> Option<(RootCertStore, Vec<Vec<u8>>)> {
        let file = self.ca_file.clone()?;
        debug!(file = %file.display(), "Trying to load CA file");

        let data = match fs::read(&file) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!(file = %file.display(), error = %e, "Failed to load CA file");
                return None;
            }
        };

        let Some(roots) = parse_pem_bundle(&data) else {
            error!(file = %file.display(), "Failed to parse PEM");
            return None;
        };

        let mut anchors = RootCertStore::empty();
        let (added, _) = anchors.add_parsable_certificates(
            roots.iter().map(|der| CertificateDer::from(der.as_slice())),
        );
        if added == 0 {
            error!(file = %file.display(), "Failed to parse PEM");
            return None;
        }

        self.ca_data = Some(data);
        Some((anchors, roots))
    }
}

/// DER contents of every CERTIFICATE block in a PEM bundle
fn parse_pem_bundle(data: &[u8]) -> Option<Vec<Vec<u8>>> {
    let certificates: Vec<Vec<u8>> = pem::parse_many(data)
        .ok()?
        .into_iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(Pem::into_contents)
        .collect();

    (!certificates.is_empty()).then_some(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn write_ca(dir: &TempDir) -> (PathBuf, String) {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let pem = generated.cert.pem();
        let path = dir.path().join("ca.crt");
        fs::write(&path, &pem).unwrap();
        (path, pem)
    }

    #[test]
    fn test_builds_once_while_ca_file_unchanged() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_ca(&dir);
        let mut trust = TransportTrust::new(Some(path), false, TIMEOUT, TIMEOUT);

        assert!(trust.needs_rebuild());
        trust.ensure().unwrap();
        trust.ensure().unwrap();

        assert_eq!(trust.generation(), 1);
        assert!(!trust.needs_rebuild());
    }

    #[test]
    fn test_rebuilds_when_ca_file_is_newer() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_ca(&dir);
        let mut trust = TransportTrust::new(Some(path.clone()), false, TIMEOUT, TIMEOUT);
        trust.ensure().unwrap();

        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        assert!(trust.needs_rebuild());
        trust.ensure().unwrap();
        assert_eq!(trust.generation(), 2);
    }

    #[test]
    fn test_loads_and_caches_valid_ca() {
        let dir = TempDir::new().unwrap();
        let (path, pem) = write_ca(&dir);
        let mut trust = TransportTrust::new(Some(path), false, TIMEOUT, TIMEOUT);

        trust.ensure().unwrap();
        assert_eq!(trust.ca_data(), Some(pem.as_bytes()));
        assert_eq!(trust.ca_chain(None), pem);
    }

    #[test]
    fn test_skip_verify_ignores_ca_file() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_ca(&dir);
        let mut trust = TransportTrust::new(Some(path), true, TIMEOUT, TIMEOUT);

        trust.ensure().unwrap();
        assert!(trust.ca_data().is_none());
    }

    #[test]
    fn test_missing_ca_file_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.crt");
        let mut trust = TransportTrust::new(Some(path), false, TIMEOUT, TIMEOUT);

        assert!(trust.ensure().is_ok());
        assert!(trust.ca_data().is_none());
        assert!(!trust.needs_rebuild());
    }

    #[test]
    fn test_garbage_ca_file_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.crt");
        fs::write(&path, "definitely not a certificate").unwrap();
        let mut trust = TransportTrust::new(Some(path), false, TIMEOUT, TIMEOUT);

        assert!(trust.ensure().is_ok());
        assert!(trust.ca_data().is_none());
    }
}
