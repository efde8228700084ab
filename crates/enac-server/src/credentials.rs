//! Transport credentials: certificate chain and private key loaded once at
//! startup and shared by every listener.

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;

use crate::error::ConfigError;

/// ALPN protocols offered on the stream (TLS over TCP) side.
pub const STREAM_ALPN: &[&[u8]] = &[b"h2", b"http/1.1"];

/// ALPN protocol offered on the datagram (QUIC) side.
pub const DATAGRAM_ALPN: &[&[u8]] = &[b"h3"];

pub struct Credentials {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certs", &self.certs.len())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read the PEM certificate chain and private key from disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, ConfigError> {
        let cert_pem = read_existing("cert", cert_path)?;
        let key_pem = read_existing("key", key_path)?;

        let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ConfigError::Read {
                path: cert_path.to_path_buf(),
                source,
            })?;
        if certs.is_empty() {
            return Err(ConfigError::NoCertificates(cert_path.to_path_buf()));
        }

        let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
            .map_err(|source| ConfigError::Read {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| ConfigError::NoPrivateKey(key_path.to_path_buf()))?;

        tracing::debug!(
            cert = %cert_path.display(),
            chain_len = certs.len(),
            "loaded credentials"
        );
        Ok(Credentials { certs, key })
    }

    pub fn chain_len(&self) -> usize {
        self.certs.len()
    }

    /// rustls server config for TLS over TCP (TLS 1.2 and 1.3).
    pub fn stream_config(&self) -> Result<ServerConfig, rustls::Error> {
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        config.alpn_protocols = STREAM_ALPN.iter().map(|p| p.to_vec()).collect();
        Ok(config)
    }

    /// rustls server config for QUIC (TLS 1.3 only).
    pub fn datagram_config(&self) -> Result<ServerConfig, rustls::Error> {
        let mut config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), self.key.clone_key())?;
        config.alpn_protocols = DATAGRAM_ALPN.iter().map(|p| p.to_vec()).collect();
        config.max_early_data_size = u32::MAX;
        Ok(config)
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_existing(what: &'static str, path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                what,
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
