//! Token-bucket pacer.
//!
//! The bucket refills at 5/4 of the estimated bandwidth so that RTT jitter
//! does not leave the congestion window under-used, and holds at most
//! `max(burst interval × rate, 10 datagrams)`.

use std::time::{Duration, Instant};

use crate::protocol::ByteCount;

const MAX_BURST_SIZE_PACKETS: ByteCount = 10;

/// Smallest delay the pacer will ask for.
pub const MIN_PACING_DELAY: Duration = Duration::from_millis(1);

const TIMER_GRANULARITY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Pacer {
    budget_at_last_sent: ByteCount,
    max_datagram_size: ByteCount,
    last_sent_time: Option<Instant>,
}

/// Bandwidth the bucket refills at, in bytes per second.
fn adjusted(bandwidth: u64) -> u64 {
    bandwidth.saturating_mul(5) / 4
}

impl Pacer {
    pub fn new(max_datagram_size: ByteCount) -> Self {
        Pacer {
            budget_at_last_sent: MAX_BURST_SIZE_PACKETS * max_datagram_size,
            max_datagram_size,
            last_sent_time: None,
        }
    }

    pub fn set_max_datagram_size(&mut self, size: ByteCount) {
        self.max_datagram_size = size;
    }

    /// Record a sent packet. `bandwidth` is the current estimate in bytes/s.
    pub fn on_packet_sent(&mut self, sent_time: Instant, size: ByteCount, bandwidth: u64) {
        let budget = self.budget(sent_time, bandwidth);
        self.budget_at_last_sent = budget.saturating_sub(size);
        self.last_sent_time = Some(sent_time);
    }

    /// Bytes that may be sent at `now` without violating the pacing rate.
    pub fn budget(&self, now: Instant, bandwidth: u64) -> ByteCount {
        let Some(last) = self.last_sent_time else {
            return self.max_burst_size(bandwidth);
        };
        let elapsed = now.saturating_duration_since(last).as_nanos();
        let refill = (u128::from(adjusted(bandwidth)) * elapsed / 1_000_000_000)
            .min(u128::from(u64::MAX)) as u64;
        self.max_burst_size(bandwidth)
            .min(self.budget_at_last_sent.saturating_add(refill))
    }

    fn max_burst_size(&self, bandwidth: u64) -> ByteCount {
        let burst_interval = (MIN_PACING_DELAY + TIMER_GRANULARITY).as_nanos();
        let by_rate = (u128::from(adjusted(bandwidth)) * burst_interval / 1_000_000_000)
            .min(u128::from(u64::MAX)) as u64;
        by_rate.max(MAX_BURST_SIZE_PACKETS * self.max_datagram_size)
    }

    /// When the next packet may go out; `None` means immediately.
    pub fn time_until_send(&self, bandwidth: u64) -> Option<Instant> {
        if self.budget_at_last_sent >= self.max_datagram_size {
            return None;
        }
        let last = self.last_sent_time?;
        let rate = adjusted(bandwidth).max(1);
        let missing = u128::from(self.max_datagram_size - self.budget_at_last_sent);
        let nanos = (missing * 1_000_000_000).div_ceil(u128::from(rate));
        let delay = Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64);
        Some(last + delay.max(MIN_PACING_DELAY))
    }
}
