//! # Datagram Server
//!
//! HTTP/3 over QUIC. quinn runs the QUIC state machine on the UDP socket
//! bound by the listener; every connection gets its congestion controller
//! from the shared [`CongestionControllerFactory`]. HTTP/3 requests are
//! bridged into the same axum router as the stream side; request bodies are
//! streamed into the router, not buffered.

use std::net::UdpSocket;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::{Buf, Bytes};
use enac_transport::ackhandler::CongestionControllerFactory;
use h3::error::StreamError;
use h3::server::{RequestResolver, RequestStream};
use http_body_util::BodyExt;
use quinn::crypto::rustls::QuicServerConfig;
use thiserror::Error;
use tower::ServiceExt;
use tracing::{debug, info};

use crate::error::ListenerError;

type RecvHalf = RequestStream<h3_quinn::RecvStream, Bytes>;

#[derive(Debug, Error)]
enum RequestError {
    #[error("HTTP/3 stream: {0}")]
    Stream(#[from] StreamError),
    #[error("response body: {0}")]
    Body(#[from] axum::Error),
}

/// Build the QUIC endpoint on an already bound UDP socket.
pub fn endpoint(
    socket: UdpSocket,
    tls: rustls::ServerConfig,
    congestion: Arc<CongestionControllerFactory>,
) -> Result<quinn::Endpoint, ListenerError> {
    let crypto =
        QuicServerConfig::try_from(tls).map_err(|e| ListenerError::Quic(e.to_string()))?;
    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));

    let mut transport = quinn::TransportConfig::default();
    transport.congestion_controller_factory(congestion);
    server_config.transport_config(Arc::new(transport));

    let addr = socket
        .local_addr()
        .map_err(|e| ListenerError::Quic(e.to_string()))?;
    socket.set_nonblocking(true).map_err(|source| ListenerError::Bind {
        transport: "udp",
        addr,
        source,
    })?;

    quinn::Endpoint::new(
        quinn::EndpointConfig::default(),
        Some(server_config),
        socket,
        Arc::new(quinn::TokioRuntime),
    )
    .map_err(|source| ListenerError::Bind {
        transport: "udp",
        addr,
        source,
    })
}

/// Accept QUIC connections until the endpoint is closed.
pub async fn serve(endpoint: quinn::Endpoint, app: Router) -> Result<(), ListenerError> {
    if let Ok(local_addr) = endpoint.local_addr() {
        info!(%local_addr, "datagram server accepting");
    }
    while let Some(incoming) = endpoint.accept().await {
        let app = app.clone();
        tokio::spawn(async move {
            let remote = incoming.remote_address();
            match incoming.await {
                Ok(connection) => serve_connection(connection, app).await,
                Err(e) => debug!(%remote, error = %e, "QUIC handshake failed"),
            }
        });
    }
    debug!("datagram endpoint closed");
    Ok(())
}

async fn serve_connection(connection: quinn::Connection, app: Router) {
    let remote = connection.remote_address();
    debug!(%remote, "QUIC connection established");

    let mut h3_conn: h3::server::Connection<h3_quinn::Connection, Bytes> =
        match h3::server::Connection::new(h3_quinn::Connection::new(connection)).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(%remote, error = %e, "HTTP/3 setup failed");
                return;
            }
        };

    loop {
        match h3_conn.accept().await {
            Ok(Some(resolver)) => {
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_request(resolver, app).await {
                        debug!(%remote, error = %e, "HTTP/3 request failed");
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%remote, error = %e, "HTTP/3 connection ended");
                break;
            }
        }
    }
}

async fn serve_request(
    resolver: RequestResolver<h3_quinn::Connection, Bytes>,
    app: Router,
) -> Result<(), RequestError> {
    let (request, stream) = resolver.resolve_request().await?;
    let (mut send, recv) = stream.split();

    let (parts, ()) = request.into_parts();
    let request = Request::from_parts(parts, request_body(recv));
    let response = match app.oneshot(request).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    };

    let (parts, mut body) = response.into_parts();
    send.send_response(Response::from_parts(parts, ())).await?;
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            send.send_data(data).await?;
        }
    }
    send.finish().await?;
    Ok(())
}

/// Expose the receiving half of a request stream as an axum body.
fn request_body(recv: RecvHalf) -> Body {
    let chunks = futures::stream::unfold(Some(recv), |recv| async move {
        let mut recv = recv?;
        match recv.recv_data().await {
            Ok(Some(mut chunk)) => {
                let data = chunk.copy_to_bytes(chunk.remaining());
                Some((Ok(data), Some(recv)))
            }
            Ok(None) => None,
            // end the body after reporting the error
            Err(e) => Some((Err(e), None)),
        }
    });
    Body::from_stream(chunks)
}
