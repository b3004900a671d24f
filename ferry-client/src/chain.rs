//! Trust-chain extraction and persistence
//!
//! Every coordinator call hands back a PEM chain. The runner stores it as the
//! CA file for later connections (trust on first use).

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use pem::{EncodeConfig, LineEnding, Pem};
use tracing::warn;

/// TLS details of a completed connection
///
/// Each verified chain is a list of DER certificates, leaf first.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub verified_chains: Vec<Vec<Vec<u8>>>,
}

/// Orders a verified handshake into a path, leaf first
///
/// Follows issuer to subject through the presented intermediates and ends at
/// the first self-issued certificate or at the configured root that issued
/// the last one. Presented certificates that are not on the path are dropped.
pub fn verified_path(leaf: &[u8], intermediates: &[Vec<u8>], roots: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut path = vec![leaf.to_vec()];

    while let Some((subject, issuer)) = path.last().and_then(|der| names(der)) {
        if subject == issuer {
            break;
        }

        let issued_by = |der: &&Vec<u8>| {
            !path.contains(*der) && names(der).is_some_and(|(candidate, _)| candidate == issuer)
        };
        let next = match intermediates.iter().find(&issued_by) {
            Some(der) => Some((der.clone(), false)),
            None => roots.iter().find(&issued_by).map(|der| (der.clone(), true)),
        };

        match next {
            Some((der, is_root)) => {
                path.push(der);
                if is_root {
                    break;
                }
            }
            None => break,
        }
    }

    path
}

/// Builds the PEM chain returned alongside a response
///
/// Cached CA bytes win verbatim. Otherwise every verified chain is walked and
/// certificates are deduplicated by signature, keeping the first occurrence.
pub fn get_ca_chain(ca_data: Option<&[u8]>, state: Option<&ConnectionState>) -> String {
    if let Some(data) = ca_data.filter(|data| !data.is_empty()) {
        return String::from_utf8_lossy(data).into_owned();
    }

    let Some(state) = state else {
        return String::new();
    };

    let mut seen = HashSet::new();
    let mut out = String::new();

    for chain in &state.verified_chains {
        for der in chain {
            let Some(signature) = certificate_signature(der) else {
                warn!("Failed to parse certificate from chain");
                continue;
            };

            if seen.insert(signature) {
                out.push_str(&encode_certificate(der));
            }
        }
    }

    out
}

/// Writes a non-empty chain to `path` unless the file already holds it
///
/// Returns whether the file was written.
pub fn persist_ca_chain(path: &Path, chain: &str) -> io::Result<bool> {
    if chain.is_empty() {
        return Ok(false);
    }

    match fs::read_to_string(path) {
        Ok(existing) if existing == chain => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, chain)?;
    Ok(true)
}

/// Raw subject and issuer names
fn names(der: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (_, certificate) = x509_parser::parse_x509_certificate(der).ok()?;
    Some((
        certificate.subject().as_raw().to_vec(),
        certificate.issuer().as_raw().to_vec(),
    ))
}

fn certificate_signature(der: &[u8]) -> Option<Vec<u8>> {
    x509_parser::parse_x509_certificate(der)
        .ok()
        .map(|(_, certificate)| certificate.signature_value.data.to_vec())
}

fn encode_certificate(der: &[u8]) -> String {
    pem::encode_config(
        &Pem::new("CERTIFICATE", der.to_vec()),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn certificate(name: &str) -> Vec<u8> {
        rcgen::generate_simple_self_signed(vec![name.to_string()])
            .unwrap()
            .cert
            .der()
            .to_vec()
    }

    fn issue(
        name: &str,
        is_ca: bool,
        issuer: Option<(&rcgen::Certificate, &rcgen::KeyPair)>,
    ) -> (rcgen::Certificate, rcgen::KeyPair) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![name.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, name);
        if is_ca {
            params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        }

        let cert = match issuer {
            Some((cert, issuer_key)) => params.signed_by(&key, cert, issuer_key).unwrap(),
            None => params.self_signed(&key).unwrap(),
        };
        (cert, key)
    }

    #[test]
    fn test_verified_path_walks_intermediates_to_root() {
        let (root, root_key) = issue("root.example", true, None);
        let (intermediate, intermediate_key) =
            issue("intermediate.example", true, Some((&root, &root_key)));
        let (leaf, _) = issue("leaf.example", false, Some((&intermediate, &intermediate_key)));
        let (unrelated, _) = issue("unrelated.example", true, None);

        let path = verified_path(
            leaf.der(),
            &[unrelated.der().to_vec(), intermediate.der().to_vec()],
            &[unrelated.der().to_vec(), root.der().to_vec()],
        );

        assert_eq!(
            path,
            vec![
                leaf.der().to_vec(),
                intermediate.der().to_vec(),
                root.der().to_vec(),
            ]
        );
    }

    #[test]
    fn test_verified_path_stops_at_presented_root() {
        let (root, root_key) = issue("root.example", true, None);
        let (leaf, _) = issue("leaf.example", false, Some((&root, &root_key)));

        let path = verified_path(leaf.der(), &[root.der().to_vec()], &[root.der().to_vec()]);
        assert_eq!(path, vec![leaf.der().to_vec(), root.der().to_vec()]);
    }

    #[test]
    fn test_verified_path_without_known_issuer_is_leaf_only() {
        let (root, root_key) = issue("root.example", true, None);
        let (leaf, _) = issue("leaf.example", false, Some((&root, &root_key)));

        assert_eq!(verified_path(leaf.der(), &[], &[]), vec![leaf.der().to_vec()]);
    }

    #[test]
    fn test_cached_ca_data_wins() {
        let state = ConnectionState {
            verified_chains: vec![vec![certificate("a.example")]],
        };
        let chain = get_ca_chain(Some(b"cached bundle"), Some(&state));
        assert_eq!(chain, "cached bundle");
    }

    #[test]
    fn test_no_tls_state_yields_empty_chain() {
        assert_eq!(get_ca_chain(None, None), "");
    }

    #[test]
    fn test_dedupes_by_signature_in_first_seen_order() {
        let a = certificate("a.example");
        let b = certificate("b.example");
        let c = certificate("c.example");
        let state = ConnectionState {
            verified_chains: vec![
                vec![a.clone(), b.clone()],
                vec![c.clone(), b.clone(), a.clone()],
            ],
        };

        let chain = get_ca_chain(None, Some(&state));
        let blocks = pem::parse_many(chain.as_bytes()).unwrap();

        let contents: Vec<&[u8]> = blocks.iter().map(|block| block.contents()).collect();
        assert_eq!(contents, vec![a.as_slice(), b.as_slice(), c.as_slice()]);
        assert!(blocks.iter().all(|block| block.tag() == "CERTIFICATE"));
    }

    #[test]
    fn test_unparsable_certificates_are_skipped() {
        let a = certificate("a.example");
        let state = ConnectionState {
            verified_chains: vec![vec![b"junk".to_vec(), a.clone()]],
        };

        let blocks = pem::parse_many(get_ca_chain(None, Some(&state)).as_bytes()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].contents(), a.as_slice());
    }

    #[test]
    fn test_persist_writes_only_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("certs").join("ci.example.com.crt");

        assert!(!persist_ca_chain(&path, "").unwrap());
        assert!(!path.exists());

        assert!(persist_ca_chain(&path, "chain-1").unwrap());
        assert!(!persist_ca_chain(&path, "chain-1").unwrap());
        assert!(persist_ca_chain(&path, "chain-2").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "chain-2");
    }
}
