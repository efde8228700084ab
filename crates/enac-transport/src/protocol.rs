//! # Protocol Vocabulary
//!
//! Plain numeric types and constants shared by the congestion and
//! ack-handling modules.

use std::fmt;

/// A number of bytes on the wire.
pub type ByteCount = u64;

/// A QUIC packet number.
pub type PacketNumber = u64;

/// Largest representable byte count; used as "no limit".
pub const MAX_BYTE_COUNT: ByteCount = u64::MAX;

/// Datagram size every QUIC path must support (RFC 9000 §14).
pub const INITIAL_MAX_DATAGRAM_SIZE: ByteCount = 1200;

/// Upper bound for the congestion window, in datagrams.
pub const MAX_CONGESTION_WINDOW_PACKETS: ByteCount = 10_000;

/// Initial congestion window, in datagrams.
pub const INITIAL_CONGESTION_WINDOW_PACKETS: ByteCount = 32;

/// Floor for the congestion window, in datagrams.
pub const MIN_CONGESTION_WINDOW_PACKETS: ByteCount = 2;

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perspective {
    Client,
    Server,
}

impl Perspective {
    pub fn as_str(self) -> &'static str {
        match self {
            Perspective::Client => "client",
            Perspective::Server => "server",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Perspective::Client => Perspective::Server,
            Perspective::Server => Perspective::Client,
        }
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// QUIC version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionNumber(pub u32);

impl VersionNumber {
    /// QUIC version 1 (RFC 9000).
    pub const V1: VersionNumber = VersionNumber(0x0000_0001);
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perspective_names() {
        assert_eq!(Perspective::Server.to_string(), "server");
        assert_eq!(Perspective::Server.opposite(), Perspective::Client);
    }

    #[test]
    fn version_display_is_hex() {
        assert_eq!(VersionNumber::V1.to_string(), "0x00000001");
    }
}
