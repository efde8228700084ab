//! # Ack Handling
//!
//! A connection's sent-packet handler and received-packet handler are built
//! together by [`new_ack_handler`] and owned as one [`AckHandler`]:
//!
//! ```text
//!   ack ──▶ ReceivedPacketHandler ──(rtt sample)──▶ RttStats
//!                    │                                  │ read
//!                    └── forwards acks ──▶ SentPacketHandler ──▶ strategy
//!   loss ────────────────────────────────────────┘
//! ```
//!
//! Neither handler can be constructed on its own. The pair is exclusively
//! owned by the connection's congestion controller (see [`controller`]).

use std::sync::Arc;
use std::time::Instant;

use crate::congestion::CongestionOptions;
use crate::protocol::{ByteCount, PacketNumber, Perspective, VersionNumber};
use crate::rtt::RttStats;
use crate::trace::ConnectionTracer;

pub mod controller;
pub mod received;
pub mod sent;

pub use controller::{AckHandlerController, CongestionControllerFactory};
pub use received::ReceivedPacketHandler;
pub use sent::{SentPacket, SentPacketHandler};

/// The sent/received handler pair of one connection.
pub struct AckHandler {
    sent: SentPacketHandler,
    received: ReceivedPacketHandler,
    tracer: Option<Arc<dyn ConnectionTracer>>,
}

/// Build the handler pair for one connection.
///
/// The sent handler obtains its congestion strategy from
/// [`new_congestion_handler`](crate::congestion::new_congestion_handler);
/// both handlers share `rtt_stats`, which only the received handler writes.
pub fn new_ack_handler(
    initial_packet_number: PacketNumber,
    initial_max_datagram_size: ByteCount,
    rtt_stats: Arc<RttStats>,
    perspective: Perspective,
    tracer: Option<Arc<dyn ConnectionTracer>>,
    version: VersionNumber,
    congestion: CongestionOptions,
) -> AckHandler {
    let sent = SentPacketHandler::new(
        initial_packet_number,
        initial_max_datagram_size,
        rtt_stats.clone(),
        perspective,
        congestion,
        tracer.clone(),
    );
    let received = ReceivedPacketHandler::new(rtt_stats, version);
    AckHandler {
        sent,
        received,
        tracer,
    }
}

impl AckHandler {
    pub fn sent(&self) -> &SentPacketHandler {
        &self.sent
    }

    pub fn received(&self) -> &ReceivedPacketHandler {
        &self.received
    }

    pub fn sent_packet(
        &mut self,
        now: Instant,
        packet_number: PacketNumber,
        bytes: ByteCount,
        is_retransmittable: bool,
    ) {
        self.sent
            .sent_packet(now, packet_number, bytes, is_retransmittable);
    }

    /// Buffer one acknowledged packet of the current ack frame.
    pub fn received_ack(&mut self, sent_time: Instant, bytes: ByteCount) {
        self.received.received_ack(sent_time, bytes);
    }

    /// End of the current ack frame.
    pub fn end_of_acks(&mut self, now: Instant) {
        self.received.end_of_acks(now, &mut self.sent);
    }

    /// Like [`end_of_acks`](Self::end_of_acks), also clamping our in-flight
    /// count to the connection's.
    pub fn end_of_acks_with_in_flight(&mut self, now: Instant, in_flight: ByteCount) {
        self.end_of_acks(now);
        self.sent.clamp_bytes_in_flight(in_flight);
    }

    /// A loss event. Acks buffered before it are delivered first so the
    /// strategy sees events in the order they were reported.
    pub fn packets_lost(
        &mut self,
        now: Instant,
        sent_time: Instant,
        lost_bytes: ByteCount,
        persistent_congestion: bool,
    ) {
        if self.received.has_pending() {
            self.received.end_of_acks(now, &mut self.sent);
        }
        self.sent
            .packets_lost(sent_time, lost_bytes, persistent_congestion);
    }

    pub fn retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.sent.retransmission_timeout(packets_retransmitted);
    }

    pub fn set_max_datagram_size(&mut self, size: ByteCount) {
        self.sent.set_max_datagram_size(size);
    }

    pub fn congestion_window(&self) -> ByteCount {
        self.sent.congestion_window()
    }

    pub fn bytes_in_flight(&self) -> ByteCount {
        self.sent.bytes_in_flight()
    }

    pub fn tracer(&self) -> Option<&Arc<dyn ConnectionTracer>> {
        self.tracer.as_ref()
    }
}
