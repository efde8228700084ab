//! enac server library.
//!
//! Serves one axum router over two transports on every bind target:
//! HTTP/1.1 and HTTP/2 over TLS/TCP ([`stream`]) and HTTP/3 over QUIC
//! ([`datagram`]), with the QUIC congestion controller supplied by
//! `enac-transport`. Exposed as a library so integration tests can drive
//! listeners directly.

pub mod config;
pub mod content;
pub mod credentials;
pub mod datagram;
pub mod error;
pub mod listener;
pub mod orchestrator;
pub mod stream;
