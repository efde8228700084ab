//! # Stream Server
//!
//! HTTP/1.1 and HTTP/2 over TLS over TCP. Every accepted connection gets
//! its own task; the accept loop itself reacts to a [`StreamShutdown`]
//! signal from the owning listener.
//!
//! Every response carries an `Alt-Svc` header pointing clients at the QUIC
//! side on the same port.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::{HeaderName, HeaderValue, InvalidHeaderValue};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};

use crate::error::ListenerError;

/// Lifetime of an Alt-Svc advertisement (30 days).
pub const ALT_SVC_MAX_AGE: u32 = 2_592_000;

const ALT_SVC: HeaderName = HeaderName::from_static("alt-svc");

/// Signal from the listener to the stream accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShutdown {
    Running,
    /// Release the listening socket; in-flight connections drain.
    StopAccepting,
    /// Release the listening socket and abort in-flight connections.
    Abort,
}

/// `h3=":<port>"; ma=2592000`
pub fn alt_svc_value(port: u16) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!("h3=\":{port}\"; ma={ALT_SVC_MAX_AGE}"))
}

/// Wrap `app` so every response advertises HTTP/3 on `port`.
pub fn with_alt_svc(app: Router, port: u16) -> Result<Router, InvalidHeaderValue> {
    let value = alt_svc_value(port)?;
    Ok(app.layer(SetResponseHeaderLayer::overriding(ALT_SVC, value)))
}

/// Accept TLS connections on `listener` until told to stop.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    app: Router,
    mut shutdown: watch::Receiver<StreamShutdown>,
) -> Result<(), ListenerError> {
    let acceptor = TlsAcceptor::from(tls);
    let mut connections = JoinSet::new();
    let local_addr = listener.local_addr().map_err(ListenerError::Accept)?;
    info!(%local_addr, "stream server accepting");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    connections.spawn(serve_connection(acceptor.clone(), tcp, peer, app.clone()));
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient accept error");
                }
                Err(e) => return Err(ListenerError::Accept(e)),
            },
            changed = shutdown.changed() => {
                let signal = if changed.is_ok() {
                    *shutdown.borrow_and_update()
                } else {
                    // listener went away
                    StreamShutdown::StopAccepting
                };
                match signal {
                    StreamShutdown::Running => continue,
                    StreamShutdown::StopAccepting => {
                        debug!(%local_addr, in_flight = connections.len(), "stream server stops accepting");
                        connections.detach_all();
                    }
                    StreamShutdown::Abort => {
                        debug!(%local_addr, in_flight = connections.len(), "stream server aborting connections");
                        connections.abort_all();
                    }
                }
                return Ok(());
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(acceptor: TlsAcceptor, tcp: TcpStream, peer: SocketAddr, app: Router) {
    let tls = match acceptor.accept(tcp).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };
    let alpn = tls
        .get_ref()
        .1
        .alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned());
    debug!(%peer, alpn = alpn.as_deref().unwrap_or("none"), "TLS connection established");

    let service = TowerToHyperService::new(app);
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
    {
        debug!(%peer, error = %e, "HTTP connection ended with error");
    }
}

/// Accept errors that concern one connection rather than the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_svc_names_the_port() {
        assert_eq!(alt_svc_value(6121).unwrap(), "h3=\":6121\"; ma=2592000");
    }
}
