//! # enac-transport
//!
//! Congestion control and loss-recovery plumbing for the enac QUIC server.
//!
//! The QUIC state machine itself is provided by `quinn`; this crate plugs
//! into quinn's congestion-controller seam and supplies the pieces that are
//! selected per connection at startup.
//!
//! ## Crate structure
//!
//! - [`protocol`] — Byte counts, packet numbers, perspective, version
//! - [`rtt`] — Lock-free round-trip-time statistics
//! - [`congestion`] — Send-algorithm traits, Reno/Cubic sender, HyStart policies
//! - [`ackhandler`] — Sent/received packet handler pair and the quinn adapter
//! - [`trace`] — Per-connection qlog-style diagnostic traces
//! - [`error`] — Option resolution errors

pub mod ackhandler;
pub mod congestion;
pub mod error;
pub mod protocol;
pub mod rtt;
pub mod trace;

pub use error::TransportError;
