//! # Dual-Stack Listener
//!
//! One bind target, two servers on the same port: TLS over TCP and QUIC
//! over UDP. The listener's lifecycle is published on a watch channel:
//!
//! ```text
//! Unbound ──bind──▶ Bound ──spawn──▶ Serving ──first exit──▶ Closed | Failed
//!    └──────────────── any setup error ─────────────────────▶ Failed
//! ```
//!
//! Whichever server terminates first decides the outcome. If the stream
//! side ends first the QUIC endpoint is closed; if the datagram side ends
//! first its result is returned at once and the stream side is told to
//! stop according to the [`ShutdownPolicy`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use enac_transport::ackhandler::CongestionControllerFactory;
use enac_transport::trace::QlogFileFactory;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::config::{ServerConfig, ShutdownPolicy};
use crate::content;
use crate::credentials::Credentials;
use crate::datagram;
use crate::error::ListenerError;
use crate::stream::{self, StreamShutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Bound(SocketAddr),
    Serving(SocketAddr),
    Closed,
    Failed,
}

impl ListenerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ListenerState::Closed | ListenerState::Failed)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Unbound => f.write_str("unbound"),
            ListenerState::Bound(addr) => write!(f, "bound on {addr}"),
            ListenerState::Serving(addr) => write!(f, "serving on {addr}"),
            ListenerState::Closed => f.write_str("closed"),
            ListenerState::Failed => f.write_str("failed"),
        }
    }
}

// ─── Shared Context ─────────────────────────────────────────────────────────

/// Everything a listener needs besides its address. Cheap to clone; one
/// instance is shared by all listeners of a process.
#[derive(Clone)]
pub struct ListenerContext {
    pub credentials: Arc<Credentials>,
    pub app: Router,
    pub congestion: Arc<CongestionControllerFactory>,
    pub shutdown: ShutdownPolicy,
}

impl ListenerContext {
    pub fn new(
        credentials: Arc<Credentials>,
        app: Router,
        congestion: Arc<CongestionControllerFactory>,
        shutdown: ShutdownPolicy,
    ) -> Self {
        ListenerContext {
            credentials,
            app,
            congestion,
            shutdown,
        }
    }

    /// Router, congestion factory and trace sink as selected by `config`.
    pub fn from_config(config: &ServerConfig, credentials: Arc<Credentials>) -> Self {
        let mut congestion = CongestionControllerFactory::new(config.congestion);
        if config.qlog {
            congestion = congestion.with_tracer_factory(Arc::new(QlogFileFactory::working_dir()));
        }
        ListenerContext::new(
            credentials,
            content::router(config.www.as_deref()),
            Arc::new(congestion),
            config.shutdown,
        )
    }
}

// ─── Listener ───────────────────────────────────────────────────────────────

pub struct DualStackListener {
    target: String,
    ctx: ListenerContext,
    state: watch::Sender<ListenerState>,
}

struct BoundSockets {
    addr: SocketAddr,
    udp: std::net::UdpSocket,
    tcp: TcpListener,
    stream_tls: Arc<rustls::ServerConfig>,
    datagram_tls: rustls::ServerConfig,
}

impl DualStackListener {
    pub fn new(target: impl Into<String>, ctx: ListenerContext) -> Self {
        let (state, _) = watch::channel(ListenerState::Unbound);
        DualStackListener {
            target: target.into(),
            ctx,
            state,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Bind, serve, and return the outcome of whichever server ends first.
    pub async fn run(self) -> Result<(), ListenerError> {
        let result = self.serve().await;
        let terminal = if result.is_ok() {
            ListenerState::Closed
        } else {
            ListenerState::Failed
        };
        self.state.send_replace(terminal);
        debug!(target_addr = %self.target, state = %terminal, "listener finished");
        result
    }

    async fn serve(&self) -> Result<(), ListenerError> {
        let sockets = self.bind().await?;
        let addr = sockets.addr;
        self.state.send_replace(ListenerState::Bound(addr));

        let endpoint = datagram::endpoint(sockets.udp, sockets.datagram_tls, self.ctx.congestion.clone())?;
        let stream_app = stream::with_alt_svc(self.ctx.app.clone(), addr.port())?;
        let (signal, signal_rx) = watch::channel(StreamShutdown::Running);

        let stream_task = tokio::spawn(stream::serve(sockets.tcp, sockets.stream_tls, stream_app, signal_rx));
        let datagram_task = tokio::spawn(datagram::serve(endpoint.clone(), self.ctx.app.clone()));

        self.state.send_replace(ListenerState::Serving(addr));
        info!(
            target_addr = %self.target,
            %addr,
            congestion = %self.ctx.congestion.options().control_type,
            hystart = %self.ctx.congestion.options().hystart,
            shutdown = %self.ctx.shutdown,
            "listener serving"
        );

        let policy = self.ctx.shutdown;
        race(
            stream_task,
            datagram_task,
            || {
                debug!(%addr, "stream server ended, closing QUIC endpoint");
                endpoint.close(0u32.into(), b"");
            },
            || {
                debug!(%addr, %policy, "datagram server ended, stopping stream server");
                signal.send_replace(stream_signal(policy));
            },
        )
        .await
    }

    async fn bind(&self) -> Result<BoundSockets, ListenerError> {
        let stream_tls = Arc::new(self.ctx.credentials.stream_config()?);
        let datagram_tls = self.ctx.credentials.datagram_config()?;

        let resolved = tokio::net::lookup_host(self.target.as_str())
            .await
            .map_err(|source| ListenerError::Resolve {
                addr: self.target.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenerError::NoAddress(self.target.clone()))?;

        let udp = std::net::UdpSocket::bind(resolved).map_err(|source| ListenerError::Bind {
            transport: "udp",
            addr: resolved,
            source,
        })?;
        // port 0 resolves here, so TCP lands on the same port as UDP
        let addr = udp.local_addr().map_err(|source| ListenerError::Bind {
            transport: "udp",
            addr: resolved,
            source,
        })?;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                transport: "tcp",
                addr,
                source,
            })?;

        debug!(target_addr = %self.target, %addr, "sockets bound");
        Ok(BoundSockets {
            addr,
            udp,
            tcp,
            stream_tls,
            datagram_tls,
        })
    }
}

// ─── Race ───────────────────────────────────────────────────────────────────

/// What the stream side is told when the datagram side ends first.
fn stream_signal(policy: ShutdownPolicy) -> StreamShutdown {
    match policy {
        ShutdownPolicy::Asymmetric => StreamShutdown::StopAccepting,
        ShutdownPolicy::Symmetric => StreamShutdown::Abort,
    }
}

type ServerTask = JoinHandle<Result<(), ListenerError>>;

/// Wait for the first server to end, notify the other side, and return the
/// first one's result. The other task is left to wind down on its own.
async fn race(
    mut stream_task: ServerTask,
    mut datagram_task: ServerTask,
    on_stream_exit: impl FnOnce(),
    on_datagram_exit: impl FnOnce(),
) -> Result<(), ListenerError> {
    tokio::select! {
        joined = &mut stream_task => {
            on_stream_exit();
            flatten("stream", joined)
        }
        joined = &mut datagram_task => {
            on_datagram_exit();
            flatten("datagram", joined)
        }
    }
}

fn flatten(
    server: &'static str,
    joined: Result<Result<(), ListenerError>, JoinError>,
) -> Result<(), ListenerError> {
    joined.map_err(|source| ListenerError::Task { server, source })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn accept_error() -> ListenerError {
        ListenerError::Accept(std::io::Error::other("boom"))
    }

    #[tokio::test]
    async fn datagram_first_error_wins_regardless_of_stream() {
        let stream_task: ServerTask = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let datagram_task: ServerTask = tokio::spawn(async { Err(accept_error()) });

        let stream_notified = AtomicBool::new(false);
        let datagram_notified = AtomicBool::new(false);
        let result = race(
            stream_task,
            datagram_task,
            || stream_notified.store(true, Ordering::SeqCst),
            || datagram_notified.store(true, Ordering::SeqCst),
        )
        .await;

        assert!(matches!(result, Err(ListenerError::Accept(_))));
        assert!(datagram_notified.load(Ordering::SeqCst));
        assert!(!stream_notified.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_first_closes_datagram_side() {
        let (closed_tx, mut closed_rx) = watch::channel(false);
        let stream_task: ServerTask = tokio::spawn(async { Ok(()) });
        let datagram_task: ServerTask = tokio::spawn(async move {
            let _ = closed_rx.wait_for(|closed| *closed).await;
            Ok(())
        });

        let result = race(
            stream_task,
            datagram_task,
            || {
                closed_tx.send_replace(true);
            },
            || panic!("datagram side must not finish first"),
        )
        .await;

        assert!(result.is_ok());
        assert!(*closed_tx.borrow());
    }

    #[tokio::test]
    async fn panicking_server_is_a_task_error() {
        let stream_task: ServerTask = tokio::spawn(async { panic!("stream server panicked") });
        let datagram_task: ServerTask = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let result = race(stream_task, datagram_task, || {}, || {}).await;
        assert!(matches!(result, Err(ListenerError::Task { server: "stream", .. })));
    }

    #[test]
    fn shutdown_policy_picks_stream_signal() {
        assert_eq!(stream_signal(ShutdownPolicy::Asymmetric), StreamShutdown::StopAccepting);
        assert_eq!(stream_signal(ShutdownPolicy::Symmetric), StreamShutdown::Abort);
        assert_eq!(stream_signal(ShutdownPolicy::default()), StreamShutdown::StopAccepting);
    }

    #[test]
    fn terminal_states() {
        assert!(ListenerState::Closed.is_terminal());
        assert!(ListenerState::Failed.is_terminal());
        assert!(!ListenerState::Unbound.is_terminal());
        let addr: SocketAddr = "127.0.0.1:6121".parse().unwrap();
        assert!(!ListenerState::Serving(addr).is_terminal());
        assert_eq!(ListenerState::Bound(addr).to_string(), "bound on 127.0.0.1:6121");
    }
}
