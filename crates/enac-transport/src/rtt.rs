//! # RTT Statistics
//!
//! Running estimate of the path round-trip time (RFC 9002 §5).
//!
//! The statistics are written by exactly one party, the received-packet
//! handler of a connection, and read by the congestion strategy of the same
//! connection. Values are stored as nanosecond atomics so the two can share
//! one `Arc<RttStats>` without a lock while still satisfying quinn's
//! `Send + Sync` bound on congestion controllers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const RTT_ALPHA_DIVISOR: u64 = 8; // 1/8
const RTT_BETA_DIVISOR: u64 = 4; // 1/4

/// Sentinel meaning "no sample yet".
const UNSET: u64 = 0;

/// Round-trip-time statistics for one connection.
#[derive(Debug, Default)]
pub struct RttStats {
    latest_rtt: AtomicU64,
    smoothed_rtt: AtomicU64,
    mean_deviation: AtomicU64,
    min_rtt: AtomicU64,
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl RttStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent RTT sample (zero before the first sample).
    pub fn latest_rtt(&self) -> Duration {
        Duration::from_nanos(self.latest_rtt.load(Ordering::Relaxed))
    }

    /// Exponentially smoothed RTT (zero before the first sample).
    pub fn smoothed_rtt(&self) -> Duration {
        Duration::from_nanos(self.smoothed_rtt.load(Ordering::Relaxed))
    }

    /// Mean deviation of the RTT samples.
    pub fn mean_deviation(&self) -> Duration {
        Duration::from_nanos(self.mean_deviation.load(Ordering::Relaxed))
    }

    /// Smallest RTT observed (zero before the first sample).
    pub fn min_rtt(&self) -> Duration {
        Duration::from_nanos(self.min_rtt.load(Ordering::Relaxed))
    }

    pub fn has_measurement(&self) -> bool {
        self.smoothed_rtt.load(Ordering::Relaxed) != UNSET
    }

    /// Feed one RTT sample: the time between sending a packet and
    /// processing its acknowledgement. Zero samples are discarded.
    ///
    /// quinn does not hand the peer's ack delay to congestion controllers,
    /// so samples are taken as measured.
    pub fn update_rtt(&self, send_delta: Duration) {
        let sample = to_nanos(send_delta);
        if sample == UNSET {
            return;
        }

        let min = self.min_rtt.load(Ordering::Relaxed);
        if min == UNSET || min > sample {
            self.min_rtt.store(sample, Ordering::Relaxed);
        }
        self.latest_rtt.store(sample, Ordering::Relaxed);

        let smoothed = self.smoothed_rtt.load(Ordering::Relaxed);
        if smoothed == UNSET {
            self.smoothed_rtt.store(sample, Ordering::Relaxed);
            self.mean_deviation.store(sample / 2, Ordering::Relaxed);
            return;
        }

        let deviation = self.mean_deviation.load(Ordering::Relaxed);
        let new_deviation = deviation - deviation / RTT_BETA_DIVISOR
            + smoothed.abs_diff(sample) / RTT_BETA_DIVISOR;
        let new_smoothed = smoothed - smoothed / RTT_ALPHA_DIVISOR + sample / RTT_ALPHA_DIVISOR;
        self.mean_deviation.store(new_deviation, Ordering::Relaxed);
        self.smoothed_rtt.store(new_smoothed, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn starts_without_measurement() {
        let rtt = RttStats::new();
        assert!(!rtt.has_measurement());
        assert_eq!(rtt.smoothed_rtt(), Duration::ZERO);
    }

    #[test]
    fn first_sample_initializes_everything() {
        let rtt = RttStats::new();
        rtt.update_rtt(ms(40));
        assert_eq!(rtt.latest_rtt(), ms(40));
        assert_eq!(rtt.smoothed_rtt(), ms(40));
        assert_eq!(rtt.min_rtt(), ms(40));
        assert_eq!(rtt.mean_deviation(), ms(20));
    }

    #[test]
    fn smoothing_moves_an_eighth() {
        let rtt = RttStats::new();
        rtt.update_rtt(ms(80));
        rtt.update_rtt(ms(160));
        assert_eq!(rtt.smoothed_rtt(), ms(90));
        assert_eq!(rtt.min_rtt(), ms(80));
        // 3/4 * 40 + 1/4 * 80
        assert_eq!(rtt.mean_deviation(), ms(50));
    }

    #[test]
    fn min_tracks_smallest_sample() {
        let rtt = RttStats::new();
        rtt.update_rtt(ms(50));
        rtt.update_rtt(ms(30));
        rtt.update_rtt(ms(70));
        assert_eq!(rtt.min_rtt(), ms(30));
        assert_eq!(rtt.latest_rtt(), ms(70));
    }

    #[test]
    fn zero_sample_ignored() {
        let rtt = RttStats::new();
        rtt.update_rtt(Duration::ZERO);
        assert!(!rtt.has_measurement());
    }
}
