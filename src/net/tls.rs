//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load PEM certificate chain and private key from disk
//! - Build a rustls server config, optionally advertising one ALPN protocol
//! - Wrap accepted (or already-negotiated) streams in TLS
//!
//! # Design Decisions
//! - Missing or unreadable key material is a startup error, never a per-connection one
//! - The ring provider is selected explicitly instead of relying on process defaults

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

/// ALPN identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// Error building the TLS acceptor.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{kind} file not found: {path}")]
    NotFound { kind: &'static str, path: String },
    #[error("failed to read {kind} file {path}: {source}")]
    Read {
        kind: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no private key found in {0}")]
    NoKey(String),
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

/// Load certificate chain and key and build a server config.
///
/// `alpn` lists the protocols offered during negotiation; HTTP/2 passes
/// exactly [`ALPN_H2`].
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
    alpn: &[&[u8]],
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    // Basic validation
    if !cert_path.exists() {
        return Err(TlsError::NotFound {
            kind: "certificate",
            path: cert_path.display().to_string(),
        });
    }
    if !key_path.exists() {
        return Err(TlsError::NotFound {
            kind: "private key",
            path: key_path.display().to_string(),
        });
    }

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

    tracing::info!(
        cert = %cert_path.display(),
        alpn = ?alpn.iter().map(|p| String::from_utf8_lossy(p)).collect::<Vec<_>>(),
        "TLS configuration loaded"
    );

    Ok(Arc::new(config))
}

/// Convenience wrapper returning a ready acceptor.
pub fn load_acceptor(
    cert_path: &Path,
    key_path: &Path,
    alpn: &[&[u8]],
) -> Result<TlsAcceptor, TlsError> {
    load_tls_config(cert_path, key_path, alpn).map(TlsAcceptor::from)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        kind: "certificate",
        path: path.display().to_string(),
        source,
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            kind: "certificate",
            path: path.display().to_string(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        kind: "private key",
        path: path.display().to_string(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Read {
            kind: "private key",
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::NoKey(path.display().to_string()))
}
