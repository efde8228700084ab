//! Sent-packet bookkeeping.
//!
//! Tracks every packet in flight in send order and turns ack and loss
//! signals into calls on the congestion strategy.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::congestion::{
    new_congestion_handler, CongestionOptions, SendAlgorithmWithDebugInfos, SendDeadline,
};
use crate::protocol::{ByteCount, PacketNumber, Perspective};
use crate::rtt::RttStats;
use crate::trace::ConnectionTracer;

/// One packet still counted in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub packet_number: PacketNumber,
    pub sent_time: Instant,
    /// Bytes not yet acknowledged or declared lost.
    pub size: ByteCount,
}

pub struct SentPacketHandler {
    perspective: Perspective,
    initial_packet_number: PacketNumber,
    largest_sent: Option<PacketNumber>,
    in_flight: VecDeque<SentPacket>,
    bytes_in_flight: ByteCount,
    congestion: Box<dyn SendAlgorithmWithDebugInfos>,
    rtt_stats: Arc<RttStats>,
    tracer: Option<Arc<dyn ConnectionTracer>>,
}

impl SentPacketHandler {
    pub(super) fn new(
        initial_packet_number: PacketNumber,
        initial_max_datagram_size: ByteCount,
        rtt_stats: Arc<RttStats>,
        perspective: Perspective,
        options: CongestionOptions,
        tracer: Option<Arc<dyn ConnectionTracer>>,
    ) -> Self {
        let congestion = new_congestion_handler(
            rtt_stats.clone(),
            initial_max_datagram_size,
            options,
            tracer.clone(),
        );
        SentPacketHandler {
            perspective,
            initial_packet_number,
            largest_sent: None,
            in_flight: VecDeque::new(),
            bytes_in_flight: 0,
            congestion,
            rtt_stats,
            tracer,
        }
    }

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    /// Number the next packet would carry if numbering is left to us.
    pub fn next_packet_number(&self) -> PacketNumber {
        match self.largest_sent {
            Some(largest) => largest + 1,
            None => self.initial_packet_number,
        }
    }

    pub fn bytes_in_flight(&self) -> ByteCount {
        self.bytes_in_flight
    }

    pub fn packets_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn congestion(&self) -> &dyn SendAlgorithmWithDebugInfos {
        self.congestion.as_ref()
    }

    pub fn congestion_window(&self) -> ByteCount {
        self.congestion.congestion_window()
    }

    pub fn time_until_send(&self) -> SendDeadline {
        self.congestion.time_until_send(self.bytes_in_flight)
    }

    pub fn has_pacing_budget(&self, now: Instant) -> bool {
        self.congestion.has_pacing_budget(now)
    }

    /// Record a packet handed to the network.
    pub fn sent_packet(
        &mut self,
        sent_time: Instant,
        packet_number: PacketNumber,
        size: ByteCount,
        is_retransmittable: bool,
    ) {
        let prior_in_flight = self.bytes_in_flight;
        self.largest_sent = Some(
            self.largest_sent
                .map_or(packet_number, |largest| largest.max(packet_number)),
        );
        if is_retransmittable && size > 0 {
            self.in_flight.push_back(SentPacket {
                packet_number,
                sent_time,
                size,
            });
            self.bytes_in_flight += size;
        }
        self.congestion.on_packet_sent(
            sent_time,
            prior_in_flight,
            packet_number,
            size,
            is_retransmittable,
        );
        if let Some(tracer) = &self.tracer {
            tracer.sent_packet(packet_number, size, self.bytes_in_flight);
        }
    }

    /// Apply one acknowledgement, matched to the packet sent at `sent_time`.
    ///
    /// Returns `false` when nothing in flight matches, e.g. a late ack for a
    /// packet that was already declared lost.
    pub(super) fn acked_packet(
        &mut self,
        sent_time: Instant,
        bytes: ByteCount,
        event_time: Instant,
    ) -> bool {
        let Some(index) = self
            .in_flight
            .iter()
            .position(|p| p.sent_time == sent_time)
        else {
            trace!(bytes, "ack for untracked packet");
            return false;
        };

        let packet = &mut self.in_flight[index];
        let packet_number = packet.packet_number;
        let acked = bytes.min(packet.size);
        packet.size -= acked;
        if packet.size == 0 {
            self.in_flight.remove(index);
        }

        let prior_in_flight = self.bytes_in_flight;
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(acked);
        self.congestion
            .on_packet_acked(packet_number, acked, prior_in_flight, event_time);
        if let Some(tracer) = &self.tracer {
            tracer.acked_packet(packet_number, acked);
        }
        true
    }

    /// Let the strategy observe a fresh RTT sample.
    pub(super) fn rtt_updated(&mut self) {
        self.congestion.on_rtt_updated();
        if let Some(tracer) = &self.tracer {
            tracer.updated_metrics(
                &self.rtt_stats,
                self.congestion.congestion_window(),
                self.bytes_in_flight,
                self.in_flight.len(),
            );
        }
    }

    /// Declare `lost_bytes` lost, newest lost packet sent at `sent_time`.
    ///
    /// Packets sent at or before `sent_time` are dropped from tracking,
    /// oldest first, until the lost bytes are accounted for.
    pub fn packets_lost(
        &mut self,
        sent_time: Instant,
        lost_bytes: ByteCount,
        persistent_congestion: bool,
    ) {
        let mut remaining = lost_bytes;
        let mut newest_lost = None;
        while remaining > 0 {
            let Some(front) = self.in_flight.front_mut() else {
                break;
            };
            if front.sent_time > sent_time {
                break;
            }
            newest_lost = Some(front.packet_number);
            if front.size <= remaining {
                remaining -= front.size;
                self.in_flight.pop_front();
            } else {
                front.size -= remaining;
                remaining = 0;
            }
        }

        let packet_number = newest_lost.or(self.largest_sent).unwrap_or(self.initial_packet_number);
        let prior_in_flight = self.bytes_in_flight;
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes);
        debug!(
            perspective = %self.perspective,
            packet_number,
            lost_bytes,
            persistent_congestion,
            "packets lost"
        );

        self.congestion
            .on_packet_lost(packet_number, lost_bytes, prior_in_flight);
        if persistent_congestion {
            self.congestion.on_retransmission_timeout(true);
        }
        if let Some(tracer) = &self.tracer {
            tracer.lost_packet(packet_number, lost_bytes);
        }
    }

    pub fn retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.congestion
            .on_retransmission_timeout(packets_retransmitted);
    }

    pub fn set_max_datagram_size(&mut self, size: ByteCount) {
        self.congestion.set_max_datagram_size(size);
    }

    /// Resynchronise with the connection's own in-flight count, which never
    /// exceeds ours unless we missed an ack.
    pub(super) fn clamp_bytes_in_flight(&mut self, in_flight: ByteCount) {
        if in_flight < self.bytes_in_flight {
            self.bytes_in_flight = in_flight;
        }
    }
}
