use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use enac_transport::TransportError;
use thiserror::Error;

/// Startup configuration errors. All of them are fatal and are raised
/// before any socket is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} argument is required")]
    Missing(&'static str),

    #[error("{what} file {path} does not exist")]
    NotFound { what: &'static str, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("shutdown policy {0:?} is not found")]
    UnknownShutdownPolicy(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that end one dual-stack listener. Other listeners are unaffected.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} did not resolve to any address")]
    NoAddress(String),

    #[error("failed to bind {transport} socket on {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("QUIC configuration failed: {0}")]
    Quic(String),

    #[error("invalid Alt-Svc header: {0}")]
    AltSvc(#[from] axum::http::header::InvalidHeaderValue),

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("{server} server task failed: {source}")]
    Task {
        server: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}
