//! # Cubic Growth Curve
//!
//! Byte-mode CUBIC window arithmetic (RFC 9438) emulating N TCP connections,
//! as used by the Chromium QUIC stack.
//!
//! Time is measured in 2^-10 second units so that the cube can be scaled
//! with shifts:
//!
//! ```text
//!   W(t) = C·(t − K)³ + W_max        C = 410 / 2^40 per byte·(2^-10 s)³
//! ```

use std::time::{Duration, Instant};

use crate::protocol::ByteCount;

const CUBE_SCALE: u32 = 40;
const CUBE_CONGESTION_WINDOW_SCALE: u64 = 410;

const DEFAULT_NUM_CONNECTIONS: u32 = 1;

/// Multiplicative decrease applied on loss.
const BETA: f32 = 0.7;

/// Additional backoff when loss happens before reaching the previous
/// maximum; gives bandwidth up to competing flows.
const BETA_LAST_MAX: f32 = 0.85;

#[derive(Debug, Clone)]
pub struct Cubic {
    num_connections: u32,
    /// Start of the current growth epoch (after the last loss).
    epoch: Option<Instant>,
    /// Window just before the last loss event.
    last_max_congestion_window: ByteCount,
    /// Acked bytes since the epoch started.
    acked_bytes_count: ByteCount,
    /// Reno-equivalent window (TCP friendliness).
    estimated_tcp_congestion_window: ByteCount,
    origin_point_congestion_window: ByteCount,
    /// Time to the origin point, in 2^-10 seconds.
    time_to_origin_point: u64,
    last_target_congestion_window: ByteCount,
    max_datagram_size: ByteCount,
}

impl Cubic {
    pub fn new(max_datagram_size: ByteCount) -> Self {
        Cubic {
            num_connections: DEFAULT_NUM_CONNECTIONS,
            epoch: None,
            last_max_congestion_window: 0,
            acked_bytes_count: 0,
            estimated_tcp_congestion_window: 0,
            origin_point_congestion_window: 0,
            time_to_origin_point: 0,
            last_target_congestion_window: 0,
            max_datagram_size,
        }
    }

    pub fn set_max_datagram_size(&mut self, size: ByteCount) {
        self.max_datagram_size = size;
    }

    fn cube_factor(&self) -> u64 {
        (1u64 << CUBE_SCALE) / CUBE_CONGESTION_WINDOW_SCALE / self.max_datagram_size
    }

    /// N-connection emulation of the Reno loss backoff.
    pub fn beta(&self) -> f32 {
        let n = self.num_connections as f32;
        (n - 1.0 + BETA) / n
    }

    fn beta_last_max(&self) -> f32 {
        let n = self.num_connections as f32;
        (n - 1.0 + BETA_LAST_MAX) / n
    }

    /// TCP-friendly additive increase (CUBIC paper §3.3).
    pub fn alpha(&self) -> f32 {
        let b = self.beta();
        let n = self.num_connections as f32;
        3.0 * n * n * (1.0 - b) / (1.0 + b)
    }

    pub fn reset(&mut self) {
        self.epoch = None;
        self.last_max_congestion_window = 0;
        self.acked_bytes_count = 0;
        self.estimated_tcp_congestion_window = 0;
        self.origin_point_congestion_window = 0;
        self.time_to_origin_point = 0;
        self.last_target_congestion_window = 0;
    }

    /// Restart the epoch so that idle time does not count as growth time.
    pub fn on_application_limited(&mut self) {
        self.epoch = None;
    }

    /// Window after a loss event.
    pub fn congestion_window_after_packet_loss(&mut self, current: ByteCount) -> ByteCount {
        if current + self.max_datagram_size < self.last_max_congestion_window {
            // Never reached the old max: assume competition and back off more.
            self.last_max_congestion_window = (self.beta_last_max() * current as f32) as ByteCount;
        } else {
            self.last_max_congestion_window = current;
        }
        self.epoch = None;
        (current as f32 * self.beta()) as ByteCount
    }

    /// Window after `acked_bytes` were acknowledged at `event_time`.
    pub fn congestion_window_after_ack(
        &mut self,
        acked_bytes: ByteCount,
        current: ByteCount,
        delay_min: Duration,
        event_time: Instant,
    ) -> ByteCount {
        self.acked_bytes_count += acked_bytes;

        let epoch = match self.epoch {
            Some(epoch) => epoch,
            None => {
                self.epoch = Some(event_time);
                self.acked_bytes_count = acked_bytes;
                self.estimated_tcp_congestion_window = current;
                if self.last_max_congestion_window <= current {
                    self.time_to_origin_point = 0;
                    self.origin_point_congestion_window = current;
                } else {
                    let gap = self.last_max_congestion_window - current;
                    self.time_to_origin_point =
                        ((self.cube_factor().saturating_mul(gap)) as f64).cbrt() as u64;
                    self.origin_point_congestion_window = self.last_max_congestion_window;
                }
                event_time
            }
        };

        let elapsed_us = (event_time + delay_min)
            .saturating_duration_since(epoch)
            .as_micros() as u64;
        let elapsed_time = (elapsed_us << 10) / 1_000_000;

        let offset = self.time_to_origin_point.abs_diff(elapsed_time);
        let delta = ((u128::from(CUBE_CONGESTION_WINDOW_SCALE)
            * u128::from(offset)
            * u128::from(offset)
            * u128::from(offset)
            * u128::from(self.max_datagram_size))
            >> CUBE_SCALE)
            .min(u128::from(u64::MAX)) as u64;

        let mut target = if elapsed_time > self.time_to_origin_point {
            self.origin_point_congestion_window.saturating_add(delta)
        } else {
            self.origin_point_congestion_window.saturating_sub(delta)
        };
        // Never grow by more than half the acked bytes.
        target = target.min(current + self.acked_bytes_count / 2);

        // Reno-equivalent growth: about alpha datagrams per window acked.
        let increase = self.acked_bytes_count as f32 * self.alpha() * self.max_datagram_size as f32
            / self.estimated_tcp_congestion_window.max(1) as f32;
        self.estimated_tcp_congestion_window += increase as ByteCount;
        self.acked_bytes_count = 0;

        self.last_target_congestion_window = target;
        target.max(self.estimated_tcp_congestion_window)
    }
}
