//! Ack intake.
//!
//! Acknowledgements for one ack frame are buffered until the frame ends, so
//! that the RTT sample taken from the newest acknowledged packet is in place
//! before the strategy sees any of the acks.

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use super::sent::SentPacketHandler;
use crate::protocol::{ByteCount, VersionNumber};
use crate::rtt::RttStats;

#[derive(Debug, Clone, Copy)]
struct PendingAck {
    sent_time: Instant,
    bytes: ByteCount,
}

pub struct ReceivedPacketHandler {
    rtt_stats: Arc<RttStats>,
    version: VersionNumber,
    pending: Vec<PendingAck>,
    acks_processed: u64,
}

impl ReceivedPacketHandler {
    pub(super) fn new(rtt_stats: Arc<RttStats>, version: VersionNumber) -> Self {
        ReceivedPacketHandler {
            rtt_stats,
            version,
            pending: Vec::new(),
            acks_processed: 0,
        }
    }

    pub fn version(&self) -> VersionNumber {
        self.version
    }

    /// Acks forwarded to the sent handler so far.
    pub fn acks_processed(&self) -> u64 {
        self.acks_processed
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(super) fn received_ack(&mut self, sent_time: Instant, bytes: ByteCount) {
        self.pending.push(PendingAck { sent_time, bytes });
    }

    /// Close the current ack frame: sample the RTT, then forward every
    /// buffered ack to `sent` in arrival order.
    pub(super) fn end_of_acks(&mut self, now: Instant, sent: &mut SentPacketHandler) {
        let Some(newest) = self.pending.iter().map(|a| a.sent_time).max() else {
            return;
        };
        let sample = now.saturating_duration_since(newest);
        self.rtt_stats.update_rtt(sample);
        trace!(
            version = %self.version,
            rtt_ms = sample.as_secs_f64() * 1000.0,
            acks = self.pending.len(),
            "ack frame processed"
        );

        for ack in self.pending.drain(..) {
            if sent.acked_packet(ack.sent_time, ack.bytes, now) {
                self.acks_processed += 1;
            }
        }
        sent.rtt_updated();
    }
}
