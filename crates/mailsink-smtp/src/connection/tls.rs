//! Server-side TLS material for STARTTLS.

use crate::config::TlsConfig;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Builds a TLS acceptor from PEM files.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if a file cannot be read, holds no
/// certificate or key, or the pair is rejected by rustls.
pub fn load_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert_file)?;
    let key = load_key(&config.key_file)?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Certificate(format!("invalid certificate/key pair: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Certificate(format!("{}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("{}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(Error::Certificate(format!(
            "{}: no certificate found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Certificate(format!("{}: {e}", path.display())))?
        .ok_or_else(|| Error::Certificate(format!("{}: no private key found", path.display())))
}
