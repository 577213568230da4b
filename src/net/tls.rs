//! Server certificate loading for secure endpoints.
//!
//! # Responsibilities
//! - Load PEM certificate chains and private keys
//! - Look up per-port certificate pairs in a folder
//! - Build the `TlsAcceptor` a secure listener wraps its sockets with
//!
//! # Design Decisions
//! - Certificates are resolved once, when the listener is created
//! - A per-port pair in the folder wins over an explicitly supplied
//!   certificate
//! - Only the `ring` provider is compiled in

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// A certificate chain and its private key.
#[derive(Debug)]
pub struct ServerCertificate {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Clone for ServerCertificate {
    fn clone(&self) -> Self {
        Self {
            certs: self.certs.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl ServerCertificate {
    /// Parse PEM text holding the chain and the key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Certificate(format!("invalid certificate PEM: {e}")))?;
        if certs.is_empty() {
            return Err(Error::Certificate("no certificate found in PEM".into()));
        }
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
            .map_err(|e| Error::Certificate(format!("invalid private key PEM: {e}")))?
            .ok_or_else(|| Error::Certificate("no private key found in PEM".into()))?;
        Ok(Self { certs, key })
    }

    /// Load a certificate and key from PEM files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| Error::Certificate(format!("{}: {e}", path.display())))
        };
        Self::from_pem(&read(cert_path)?, &read(key_path)?)
    }

    pub fn certs(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    /// Server-side TLS acceptor for this certificate.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Certificate(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())
            .map_err(|e| Error::Certificate(e.to_string()))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Source of per-port server certificates.
pub trait CertificateProvider: Send + Sync {
    /// Certificate for a secure endpoint on `port`, if one is configured.
    fn resolve(&self, port: u16) -> Result<Option<ServerCertificate>>;
}

/// Looks for `{port}.cer` and `{port}.key` in a folder.
#[derive(Debug, Clone)]
pub struct FolderCertificateProvider {
    folder: PathBuf,
}

impl FolderCertificateProvider {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self { folder: folder.into() }
    }

    /// Folder from the config, else `<data dir>/ws-engine`.
    pub fn from_config(folder: Option<&Path>) -> Self {
        match folder {
            Some(folder) => Self::new(folder),
            None => Self::new(default_folder()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

impl CertificateProvider for FolderCertificateProvider {
    fn resolve(&self, port: u16) -> Result<Option<ServerCertificate>> {
        let cert = self.folder.join(format!("{port}.cer"));
        let key = self.folder.join(format!("{port}.key"));
        if !cert.is_file() || !key.is_file() {
            return Ok(None);
        }
        tracing::debug!(port, folder = %self.folder.display(), "Loading per-port certificate");
        ServerCertificate::from_pem_files(&cert, &key).map(Some)
    }
}

fn default_folder() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ws-engine")
}

/// Pick the certificate for a secure endpoint on `port`.
pub fn resolve_certificate(
    provider: &dyn CertificateProvider,
    port: u16,
    explicit: Option<&ServerCertificate>,
) -> Result<ServerCertificate> {
    if let Some(cert) = provider.resolve(port)? {
        return Ok(cert);
    }
    explicit.cloned().ok_or(Error::CertificateMissing(port))
}
