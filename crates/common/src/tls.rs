//! TLS material loading and rustls config construction.
//!
//! Both broker listeners take a PEM key/cert pair; the agent's tunnel dial
//! verifies the broker against a configured CA bundle, or skips
//! verification entirely when `rejectUnauthorized` is false.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::{ListenerTlsConfig, TunnelTlsConfig};
use crate::error::{ConfigError, Result};

/// Build an acceptor for a TLS-enabled listener from its key/cert pair.
pub fn tls_acceptor(ssl: &ListenerTlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(Path::new(&ssl.cert))?;
    let key = load_private_key(Path::new(&ssl.key))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::TlsInvalid {
            path: ssl.cert.clone().into(),
            reason: e.to_string(),
        })?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a connector for the agent's tunnel dial.
///
/// With `rejectUnauthorized` the broker must chain to the configured CA;
/// without it any certificate is accepted.
pub fn tls_connector(ssl: &TunnelTlsConfig) -> Result<TlsConnector> {
    let config = if ssl.reject_unauthorized {
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(Path::new(&ssl.ca))? {
            roots.add(cert).map_err(|e| ConfigError::TlsInvalid {
                path: ssl.ca.clone().into(),
                reason: e.to_string(),
            })?;
        }
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            .with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| ConfigError::TlsRead {
        path: path.to_path_buf(),
        source,
    })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::io::Result<_>>()
        .map_err(|source| ConfigError::TlsRead {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(ConfigError::TlsInvalid {
            path: path.to_path_buf(),
            reason: "no certificates found".into(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|source| ConfigError::TlsRead {
        path: path.to_path_buf(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| ConfigError::TlsRead {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ConfigError::TlsInvalid {
            path: path.to_path_buf(),
            reason: "no private key found".into(),
        })
}

/// A `ServerCertVerifier` that accepts any certificate. Used when
/// `rejectUnauthorized` is disabled on the tunnel dial.
#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
