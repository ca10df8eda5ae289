//! TLS acceptor for the relay listeners.
//!
//! Loads a PEM certificate chain and private key and wraps
//! `tokio_rustls::TlsAcceptor` with the `ring` provider.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// TLS-specific errors.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate from file.
    #[error("failed to load certificate from {path}: {reason}")]
    CertificateLoad {
        /// Path to the certificate file.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },
    /// Failed to load private key from file.
    #[error("failed to load private key from {path}: {reason}")]
    PrivateKeyLoad {
        /// Path to the key file.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Config(String),
}

impl TlsError {
    /// Certificate load error.
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Private key load error.
    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}

/// Read every certificate from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))
}

/// Read the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}

/// Server-side TLS upgrade for accepted TCP streams.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Build an acceptor from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let certs = load_certificates(cert_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(cert_path, "no certificates found in file"));
        }
        let key = load_private_key(key_path)?;

        let provider = rustls::crypto::ring::default_provider();
        let config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("failed to set protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::config(format!("failed to build TLS config: {e}")))?;

        Ok(Self::from_config(Arc::new(config)))
    }

    /// Wrap an existing rustls configuration.
    pub fn from_config(config: Arc<ServerConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsAcceptor::from(config),
        }
    }

    /// Perform the server side of the handshake.
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

impl std::fmt::Debug for TlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsAcceptor").finish_non_exhaustive()
    }
}
