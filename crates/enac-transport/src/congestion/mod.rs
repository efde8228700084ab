//! # Congestion Control
//!
//! A uniform send-algorithm interface plus the factory that turns a
//! [`CongestionOptions`] into a constructed strategy for one connection.
//!
//! ```text
//!   CongestionOptions ──▶ new_congestion_handler ──▶ CubicSender { reno: bool }
//!                                                        │
//!                                                        └── SlowStartPolicy
//!                                                             (standard | ++ | none)
//! ```
//!
//! Reno is a restricted mode of the cubic-family sender (classic additive
//! increase instead of the cubic curve), so both algorithms share one
//! implementation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::error::TransportError;
use crate::protocol::{ByteCount, PacketNumber};
use crate::rtt::RttStats;
use crate::trace::ConnectionTracer;

pub mod cubic;
pub mod hystart;
pub mod pacer;
pub mod sender;

pub use hystart::SlowStartPolicy;
pub use sender::CubicSender;

// ─── Options ────────────────────────────────────────────────────────────────

/// Congestion control algorithm family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CongestionControlType {
    #[default]
    NewReno,
    Cubic,
    /// Defined for completeness; not selectable by name.
    Bbr,
}

/// Slow-start exit heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HystartType {
    #[default]
    Standard,
    PlusPlus,
    None,
}

/// Names accepted for [`CongestionControlType`].
pub const CONGESTION_NAMES: &[(&str, CongestionControlType)] = &[
    ("newreno", CongestionControlType::NewReno),
    ("cubic", CongestionControlType::Cubic),
];

/// Names accepted for [`HystartType`].
pub const HYSTART_NAMES: &[(&str, HystartType)] = &[
    ("standard", HystartType::Standard),
    ("plusplus", HystartType::PlusPlus),
    ("none", HystartType::None),
];

impl FromStr for CongestionControlType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CONGESTION_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, t)| *t)
            .ok_or_else(|| TransportError::UnknownCongestionControl(s.to_string()))
    }
}

impl FromStr for HystartType {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HYSTART_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, t)| *t)
            .ok_or_else(|| TransportError::UnknownHystart(s.to_string()))
    }
}

impl fmt::Display for CongestionControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CongestionControlType::NewReno => "NewReno",
            CongestionControlType::Cubic => "Cubic",
            CongestionControlType::Bbr => "Bbr",
        })
    }
}

impl fmt::Display for HystartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HystartType::Standard => "standard",
            HystartType::PlusPlus => "++",
            HystartType::None => "none",
        })
    }
}

/// Per-connection congestion configuration, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CongestionOptions {
    pub control_type: CongestionControlType,
    pub hystart: HystartType,
}

impl CongestionOptions {
    /// Resolve both names, failing on the first unknown one.
    pub fn from_names(congestion: &str, hystart: &str) -> Result<Self, TransportError> {
        Ok(CongestionOptions {
            control_type: congestion.parse()?,
            hystart: hystart.parse()?,
        })
    }
}

// ─── Send Algorithm ─────────────────────────────────────────────────────────

/// When the next packet may be sent. Ordered from earliest to latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SendDeadline {
    /// Send immediately.
    Now,
    /// Wait for the pacer.
    At(Instant),
    /// The congestion window is full; wait for an ack or loss.
    Blocked,
}

/// A congestion control strategy.
pub trait SendAlgorithm: Send + Sync {
    /// Earliest time another packet may be sent with `bytes_in_flight`
    /// outstanding.
    fn time_until_send(&self, bytes_in_flight: ByteCount) -> SendDeadline;

    fn has_pacing_budget(&self, now: Instant) -> bool;

    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        bytes_in_flight: ByteCount,
        packet_number: PacketNumber,
        bytes: ByteCount,
        is_retransmittable: bool,
    );

    /// True iff `bytes_in_flight` is below the congestion window.
    fn can_send(&self, bytes_in_flight: ByteCount) -> bool;

    fn on_rtt_updated(&mut self);

    fn on_packet_acked(
        &mut self,
        packet_number: PacketNumber,
        acked_bytes: ByteCount,
        prior_in_flight: ByteCount,
        event_time: Instant,
    );

    fn on_packet_lost(
        &mut self,
        packet_number: PacketNumber,
        lost_bytes: ByteCount,
        prior_in_flight: ByteCount,
    );

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    fn set_max_datagram_size(&mut self, size: ByteCount);
}

/// A strategy that exposes its internal phase for debugging and tracing.
pub trait SendAlgorithmWithDebugInfos: SendAlgorithm {
    fn in_slow_start(&self) -> bool;
    fn in_recovery(&self) -> bool;
    fn congestion_window(&self) -> ByteCount;
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Build the strategy selected by `options` for one connection.
pub fn new_congestion_handler(
    rtt_stats: Arc<RttStats>,
    initial_max_datagram_size: ByteCount,
    options: CongestionOptions,
    tracer: Option<Arc<dyn ConnectionTracer>>,
) -> Box<dyn SendAlgorithmWithDebugInfos> {
    let slow_start = SlowStartPolicy::new(options.hystart);

    let reno = match options.control_type {
        CongestionControlType::NewReno => true,
        CongestionControlType::Cubic => false,
        CongestionControlType::Bbr => {
            tracing::warn!("BBR is not implemented, falling back to Cubic");
            false
        }
    };
    let algorithm = if reno {
        CongestionControlType::NewReno
    } else {
        CongestionControlType::Cubic
    };
    tracing::info!(
        congestion = %algorithm,
        hystart = %options.hystart,
        "congestion control selected"
    );

    Box::new(CubicSender::new(
        rtt_stats,
        initial_max_datagram_size,
        reno,
        slow_start,
        tracer,
    ))
}
