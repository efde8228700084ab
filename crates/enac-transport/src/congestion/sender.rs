//! # Reno / Cubic Sender
//!
//! Window-based sender shared by NewReno and Cubic. The two differ only in
//! how the window reacts outside slow start:
//!
//! | event                | reno                         | cubic                     |
//! |----------------------|------------------------------|---------------------------|
//! | ack in avoidance     | +1 datagram per window acked | [`Cubic`] growth curve    |
//! | loss                 | window × 0.7                 | window × β (with fast convergence) |
//!
//! Slow start grows the window by the [`SlowStartPolicy`] increment per ack
//! and ends on loss or when the policy detects a delay increase.

use std::sync::Arc;
use std::time::Instant;

use super::cubic::Cubic;
use super::hystart::SlowStartPolicy;
use super::pacer::Pacer;
use super::{SendAlgorithm, SendAlgorithmWithDebugInfos, SendDeadline};
use crate::protocol::{
    ByteCount, PacketNumber, INITIAL_CONGESTION_WINDOW_PACKETS, MAX_BYTE_COUNT,
    MAX_CONGESTION_WINDOW_PACKETS, MIN_CONGESTION_WINDOW_PACKETS,
};
use crate::rtt::RttStats;
use crate::trace::{CongestionState, ConnectionTracer};

/// Headroom (in datagrams) below which the sender still counts as
/// window-limited.
const MAX_BURST_PACKETS: ByteCount = 3;

const RENO_BETA: f64 = 0.7;

pub struct CubicSender {
    rtt_stats: Arc<RttStats>,
    cubic: Cubic,
    pacer: Pacer,
    slow_start: SlowStartPolicy,
    reno: bool,

    largest_sent_packet_number: Option<PacketNumber>,
    largest_acked_packet_number: Option<PacketNumber>,
    largest_sent_at_last_cutback: Option<PacketNumber>,
    last_cutback_exited_slowstart: bool,

    /// Acks counted towards the next reno increase.
    num_acked_packets: u64,

    congestion_window: ByteCount,
    slow_start_threshold: ByteCount,
    initial_max_congestion_window: ByteCount,
    max_datagram_size: ByteCount,

    last_state: CongestionState,
    tracer: Option<Arc<dyn ConnectionTracer>>,
}

impl CubicSender {
    pub fn new(
        rtt_stats: Arc<RttStats>,
        initial_max_datagram_size: ByteCount,
        reno: bool,
        slow_start: SlowStartPolicy,
        tracer: Option<Arc<dyn ConnectionTracer>>,
    ) -> Self {
        Self::with_windows(
            rtt_stats,
            initial_max_datagram_size,
            INITIAL_CONGESTION_WINDOW_PACKETS * initial_max_datagram_size,
            MAX_CONGESTION_WINDOW_PACKETS * initial_max_datagram_size,
            reno,
            slow_start,
            tracer,
        )
    }

    pub fn with_windows(
        rtt_stats: Arc<RttStats>,
        initial_max_datagram_size: ByteCount,
        initial_congestion_window: ByteCount,
        initial_max_congestion_window: ByteCount,
        reno: bool,
        slow_start: SlowStartPolicy,
        tracer: Option<Arc<dyn ConnectionTracer>>,
    ) -> Self {
        let sender = CubicSender {
            rtt_stats,
            cubic: Cubic::new(initial_max_datagram_size),
            pacer: Pacer::new(initial_max_datagram_size),
            slow_start,
            reno,
            largest_sent_packet_number: None,
            largest_acked_packet_number: None,
            largest_sent_at_last_cutback: None,
            last_cutback_exited_slowstart: false,
            num_acked_packets: 0,
            congestion_window: initial_congestion_window,
            slow_start_threshold: MAX_BYTE_COUNT,
            initial_max_congestion_window,
            max_datagram_size: initial_max_datagram_size,
            last_state: CongestionState::SlowStart,
            tracer,
        };
        if let Some(tracer) = &sender.tracer {
            tracer.updated_congestion_state(CongestionState::SlowStart);
        }
        sender
    }

    pub fn slow_start_policy(&self) -> &SlowStartPolicy {
        &self.slow_start
    }

    pub fn slow_start_threshold(&self) -> ByteCount {
        self.slow_start_threshold
    }

    /// Whether the last cutback happened while still in slow start.
    pub fn last_cutback_exited_slowstart(&self) -> bool {
        self.last_cutback_exited_slowstart
    }

    fn min_congestion_window(&self) -> ByteCount {
        MIN_CONGESTION_WINDOW_PACKETS * self.max_datagram_size
    }

    fn max_congestion_window(&self) -> ByteCount {
        self.initial_max_congestion_window
    }

    /// Current bandwidth estimate in bytes per second.
    pub fn bandwidth_estimate(&self) -> u64 {
        let srtt = self.rtt_stats.smoothed_rtt().as_nanos();
        if srtt == 0 {
            return u64::MAX;
        }
        (u128::from(self.congestion_window) * 1_000_000_000 / srtt).min(u128::from(u64::MAX)) as u64
    }

    fn maybe_exit_slow_start(&mut self) {
        if !self.in_slow_start() {
            return;
        }
        let window_packets = self.congestion_window / self.max_datagram_size;
        if self.slow_start.should_exit_slow_start(
            self.rtt_stats.latest_rtt(),
            self.rtt_stats.min_rtt(),
            window_packets,
        ) {
            // exit slow start
            self.slow_start_threshold = self.congestion_window;
            self.maybe_trace_state_change(CongestionState::CongestionAvoidance);
        }
    }

    fn maybe_increase_cwnd(
        &mut self,
        acked_bytes: ByteCount,
        prior_in_flight: ByteCount,
        event_time: Instant,
    ) {
        // Do not grow the window while application limited.
        if !self.is_cwnd_limited(prior_in_flight) {
            self.cubic.on_application_limited();
            self.maybe_trace_state_change(CongestionState::ApplicationLimited);
            return;
        }
        if self.congestion_window >= self.max_congestion_window() {
            return;
        }
        if self.in_slow_start() {
            let increment = self
                .slow_start
                .slow_start_increment(acked_bytes, self.max_datagram_size);
            self.congestion_window =
                (self.congestion_window + increment).min(self.max_congestion_window());
            self.maybe_trace_state_change(CongestionState::SlowStart);
            return;
        }

        self.maybe_trace_state_change(CongestionState::CongestionAvoidance);
        if self.reno {
            self.num_acked_packets += 1;
            if self.num_acked_packets >= self.congestion_window / self.max_datagram_size {
                self.congestion_window =
                    (self.congestion_window + self.max_datagram_size).min(self.max_congestion_window());
                self.num_acked_packets = 0;
            }
        } else {
            let next = self.cubic.congestion_window_after_ack(
                acked_bytes,
                self.congestion_window,
                self.rtt_stats.min_rtt(),
                event_time,
            );
            self.congestion_window =
                next.clamp(self.min_congestion_window(), self.max_congestion_window());
        }
    }

    fn is_cwnd_limited(&self, bytes_in_flight: ByteCount) -> bool {
        let congestion_window = self.congestion_window;
        if bytes_in_flight >= congestion_window {
            return true;
        }
        let available = congestion_window - bytes_in_flight;
        let slow_start_limited = self.in_slow_start() && bytes_in_flight > congestion_window / 2;
        slow_start_limited || available <= MAX_BURST_PACKETS * self.max_datagram_size
    }

    fn maybe_trace_state_change(&mut self, new: CongestionState) {
        if new == self.last_state {
            return;
        }
        self.last_state = new;
        if let Some(tracer) = &self.tracer {
            tracer.updated_congestion_state(new);
        }
    }
}

impl SendAlgorithm for CubicSender {
    fn time_until_send(&self, bytes_in_flight: ByteCount) -> SendDeadline {
        if !self.can_send(bytes_in_flight) {
            return SendDeadline::Blocked;
        }
        match self.pacer.time_until_send(self.bandwidth_estimate()) {
            Some(at) => SendDeadline::At(at),
            None => SendDeadline::Now,
        }
    }

    fn has_pacing_budget(&self, now: Instant) -> bool {
        self.pacer.budget(now, self.bandwidth_estimate()) >= self.max_datagram_size
    }

    fn on_packet_sent(
        &mut self,
        sent_time: Instant,
        _bytes_in_flight: ByteCount,
        packet_number: PacketNumber,
        bytes: ByteCount,
        is_retransmittable: bool,
    ) {
        let bandwidth = self.bandwidth_estimate();
        self.pacer.on_packet_sent(sent_time, bytes, bandwidth);
        if !is_retransmittable {
            return;
        }
        self.largest_sent_packet_number = Some(packet_number);
        self.slow_start.on_packet_sent(packet_number);
    }

    fn can_send(&self, bytes_in_flight: ByteCount) -> bool {
        bytes_in_flight < self.congestion_window
    }

    fn on_rtt_updated(&mut self) {
        // the policy settles its round first so an exit applies to this frame
        self.slow_start.on_rtt_updated();
        self.maybe_exit_slow_start();
    }

    fn on_packet_acked(
        &mut self,
        packet_number: PacketNumber,
        acked_bytes: ByteCount,
        prior_in_flight: ByteCount,
        event_time: Instant,
    ) {
        self.largest_acked_packet_number = Some(
            self.largest_acked_packet_number
                .map_or(packet_number, |largest| largest.max(packet_number)),
        );
        if self.in_recovery() {
            return;
        }
        if self.in_slow_start() {
            self.slow_start
                .on_packet_acked(packet_number, self.rtt_stats.latest_rtt());
        }
        self.maybe_increase_cwnd(acked_bytes, prior_in_flight, event_time);
    }

    fn on_packet_lost(
        &mut self,
        packet_number: PacketNumber,
        _lost_bytes: ByteCount,
        _prior_in_flight: ByteCount,
    ) {
        // Only one cutback per window of packets in flight.
        if self
            .largest_sent_at_last_cutback
            .is_some_and(|cutback| packet_number <= cutback)
        {
            return;
        }
        self.last_cutback_exited_slowstart = self.in_slow_start();
        self.maybe_trace_state_change(CongestionState::Recovery);
        self.slow_start.on_congestion_event();

        self.congestion_window = if self.reno {
            (self.congestion_window as f64 * RENO_BETA) as ByteCount
        } else {
            self.cubic
                .congestion_window_after_packet_loss(self.congestion_window)
        };
        self.congestion_window = self.congestion_window.max(self.min_congestion_window());
        self.slow_start_threshold = self.congestion_window;
        self.largest_sent_at_last_cutback = self.largest_sent_packet_number;
        // Reset the packet count from congestion avoidance mode.
        self.num_acked_packets = 0;
    }

    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
        self.largest_sent_at_last_cutback = None;
        if !packets_retransmitted {
            return;
        }
        self.slow_start.restart();
        self.cubic.reset();
        self.slow_start_threshold = self.congestion_window / 2;
        self.congestion_window = self.min_congestion_window();
    }

    fn set_max_datagram_size(&mut self, size: ByteCount) {
        if size == self.max_datagram_size {
            return;
        }
        if size < self.max_datagram_size {
            tracing::debug!(
                from = self.max_datagram_size,
                to = size,
                "max datagram size decreased"
            );
        }
        let cwnd_is_min = self.congestion_window == self.min_congestion_window();
        self.max_datagram_size = size;
        if cwnd_is_min || self.congestion_window < self.min_congestion_window() {
            self.congestion_window = self.min_congestion_window();
        }
        self.cubic.set_max_datagram_size(size);
        self.pacer.set_max_datagram_size(size);
        if let Some(tracer) = &self.tracer {
            tracer.updated_max_datagram_size(size);
        }
    }
}

impl SendAlgorithmWithDebugInfos for CubicSender {
    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    fn in_recovery(&self) -> bool {
        match (self.largest_acked_packet_number, self.largest_sent_at_last_cutback) {
            (Some(acked), Some(cutback)) => acked <= cutback,
            _ => false,
        }
    }

    fn congestion_window(&self) -> ByteCount {
        self.congestion_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::HystartType;
    use std::sync::Mutex;
    use std::time::Duration;

    const MDS: ByteCount = 1200;

    fn reno() -> CubicSender {
        CubicSender::new(
            Arc::new(RttStats::new()),
            MDS,
            true,
            SlowStartPolicy::new(HystartType::None),
            None,
        )
    }

    fn cubic() -> CubicSender {
        CubicSender::new(
            Arc::new(RttStats::new()),
            MDS,
            false,
            SlowStartPolicy::new(HystartType::None),
            None,
        )
    }

    fn send(sender: &mut CubicSender, range: std::ops::RangeInclusive<PacketNumber>) {
        let now = Instant::now();
        for pn in range {
            sender.on_packet_sent(now, 0, pn, MDS, true);
        }
    }

    #[test]
    fn starts_in_slow_start_with_initial_window() {
        let sender = reno();
        assert_eq!(sender.congestion_window(), 32 * MDS);
        assert!(sender.in_slow_start());
        assert!(!sender.in_recovery());
    }

    #[test]
    fn slow_start_grows_one_datagram_per_ack() {
        let mut sender = reno();
        send(&mut sender, 1..=10);
        let now = Instant::now();
        for pn in 1..=10 {
            let cwnd = sender.congestion_window();
            sender.on_packet_acked(pn, MDS, cwnd, now);
            assert_eq!(sender.congestion_window(), cwnd + MDS);
        }
    }

    #[test]
    fn application_limited_does_not_grow() {
        let mut sender = reno();
        send(&mut sender, 1..=1);
        let cwnd = sender.congestion_window();
        sender.on_packet_acked(1, MDS, MDS, Instant::now());
        assert_eq!(sender.congestion_window(), cwnd);
    }

    #[test]
    fn reno_loss_backs_off_and_enters_recovery() {
        let mut sender = reno();
        send(&mut sender, 1..=10);
        let before = sender.congestion_window();
        sender.on_packet_lost(1, MDS, 10 * MDS);
        assert_eq!(sender.congestion_window(), (before as f64 * RENO_BETA) as ByteCount);
        assert!(!sender.in_slow_start());
        assert!(sender.last_cutback_exited_slowstart());

        sender.on_packet_acked(2, MDS, 9 * MDS, Instant::now());
        assert!(sender.in_recovery());

        // packets sent before the cutback do not cut again
        let cwnd = sender.congestion_window();
        sender.on_packet_lost(5, MDS, 8 * MDS);
        assert_eq!(sender.congestion_window(), cwnd);
    }

    #[test]
    fn reno_congestion_avoidance_adds_one_datagram_per_window() {
        let mut sender = reno();
        send(&mut sender, 1..=10);
        sender.on_packet_lost(1, MDS, 10 * MDS);
        let cwnd = sender.congestion_window();
        let per_window = cwnd / MDS;

        send(&mut sender, 11..=(10 + per_window));
        let now = Instant::now();
        for pn in 11..(10 + per_window) {
            sender.on_packet_acked(pn, MDS, cwnd, now);
            assert_eq!(sender.congestion_window(), cwnd);
        }
        assert!(!sender.in_recovery());
        sender.on_packet_acked(10 + per_window, MDS, cwnd, now);
        assert_eq!(sender.congestion_window(), cwnd + MDS);
    }

    #[test]
    fn cubic_loss_uses_cubic_backoff() {
        let mut sender = cubic();
        send(&mut sender, 1..=10);
        let before = sender.congestion_window();
        sender.on_packet_lost(3, MDS, 10 * MDS);
        assert!(sender.congestion_window() < before);
        assert!(sender.congestion_window() >= 2 * MDS);
    }

    #[test]
    fn repeated_loss_never_drops_below_minimum() {
        let mut sender = cubic();
        let mut pn = 1;
        for _ in 0..50 {
            send(&mut sender, pn..=pn);
            sender.on_packet_lost(pn, MDS, MDS);
            pn += 1;
        }
        assert_eq!(sender.congestion_window(), 2 * MDS);
    }

    #[test]
    fn retransmission_timeout_collapses_window() {
        let mut sender = reno();
        send(&mut sender, 1..=5);
        let before = sender.congestion_window();
        sender.on_retransmission_timeout(true);
        assert_eq!(sender.congestion_window(), 2 * MDS);
        assert_eq!(sender.slow_start_threshold(), before / 2);
        assert!(sender.in_slow_start());
    }

    #[test]
    fn retransmission_timeout_without_retransmits_keeps_window() {
        let mut sender = reno();
        send(&mut sender, 1..=5);
        sender.on_packet_lost(1, MDS, 5 * MDS);
        let cwnd = sender.congestion_window();
        sender.on_retransmission_timeout(false);
        assert_eq!(sender.congestion_window(), cwnd);
        // the cutback marker is cleared, so the next loss cuts again
        sender.on_packet_lost(2, MDS, 4 * MDS);
        assert!(sender.congestion_window() < cwnd);
    }

    #[test]
    fn full_window_blocks_sending() {
        let sender = reno();
        let cwnd = sender.congestion_window();
        assert!(sender.can_send(cwnd - 1));
        assert!(!sender.can_send(cwnd));
        assert_eq!(sender.time_until_send(cwnd), SendDeadline::Blocked);
        assert_eq!(sender.time_until_send(0), SendDeadline::Now);
    }

    #[test]
    fn bandwidth_follows_window_over_srtt() {
        let rtt = Arc::new(RttStats::new());
        let sender = CubicSender::new(rtt.clone(), MDS, true, SlowStartPolicy::new(HystartType::None), None);
        assert_eq!(sender.bandwidth_estimate(), u64::MAX);
        rtt.update_rtt(Duration::from_millis(100));
        assert_eq!(sender.bandwidth_estimate(), 32 * MDS * 10);
    }

    #[test]
    fn smaller_datagram_size_keeps_window_valid() {
        let mut sender = reno();
        sender.on_retransmission_timeout(true);
        assert_eq!(sender.congestion_window(), 2 * MDS);
        sender.set_max_datagram_size(1000);
        assert_eq!(sender.congestion_window(), 2 * 1000);
        sender.set_max_datagram_size(1400);
        assert_eq!(sender.congestion_window(), 2 * 1400);
    }

    #[derive(Default)]
    struct StateRecorder(Mutex<Vec<CongestionState>>);

    impl ConnectionTracer for StateRecorder {
        fn updated_congestion_state(&self, state: CongestionState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn traces_state_transitions_once() {
        let recorder = Arc::new(StateRecorder::default());
        let mut sender = CubicSender::new(
            Arc::new(RttStats::new()),
            MDS,
            true,
            SlowStartPolicy::new(HystartType::None),
            Some(recorder.clone()),
        );
        send(&mut sender, 1..=4);
        let now = Instant::now();
        let cwnd = sender.congestion_window();
        sender.on_packet_acked(1, MDS, cwnd, now);
        sender.on_packet_lost(2, MDS, cwnd);
        sender.on_packet_lost(3, MDS, cwnd);

        let states = recorder.0.lock().unwrap().clone();
        assert_eq!(states, vec![CongestionState::SlowStart, CongestionState::Recovery]);
    }

    #[test]
    fn hystart_plus_plus_exits_on_loss() {
        let mut sender = CubicSender::new(
            Arc::new(RttStats::new()),
            MDS,
            false,
            SlowStartPolicy::new(HystartType::PlusPlus),
            None,
        );
        send(&mut sender, 1..=3);
        sender.on_packet_lost(1, MDS, 3 * MDS);
        sender.on_rtt_updated();
        assert!(!sender.in_slow_start());
        assert!(matches!(
            sender.slow_start_policy(),
            SlowStartPolicy::PlusPlus(h) if h.has_exited()
        ));
    }

    /// One HyStart++ round: eight acks at `sample`, then the frame ends.
    fn hystart_round(sender: &mut CubicSender, rtt: &RttStats, next_pn: &mut PacketNumber, sample: Duration) {
        let now = Instant::now();
        let first = *next_pn;
        for pn in first..first + 8 {
            sender.on_packet_sent(now, 0, pn, MDS, true);
        }
        rtt.update_rtt(sample);
        for pn in first..first + 8 {
            let cwnd = sender.congestion_window();
            sender.on_packet_acked(pn, MDS, cwnd, now);
        }
        *next_pn += 8;
        sender.on_packet_sent(now, 0, *next_pn, MDS, true);
        *next_pn += 1;
        sender.on_rtt_updated();
    }

    #[test]
    fn hystart_plus_plus_exit_applies_in_the_same_frame() {
        let rtt = Arc::new(RttStats::new());
        let mut sender = CubicSender::new(
            rtt.clone(),
            MDS,
            false,
            SlowStartPolicy::new(HystartType::PlusPlus),
            None,
        );
        let mut pn = 0;
        hystart_round(&mut sender, &rtt, &mut pn, Duration::from_millis(30));
        hystart_round(&mut sender, &rtt, &mut pn, Duration::from_millis(31));
        // delay increase: conservative slow start, then five rounds to exit
        hystart_round(&mut sender, &rtt, &mut pn, Duration::from_millis(40));
        for _ in 0..3 {
            hystart_round(&mut sender, &rtt, &mut pn, Duration::from_millis(41));
        }
        assert!(sender.in_slow_start());

        hystart_round(&mut sender, &rtt, &mut pn, Duration::from_millis(41));
        assert!(matches!(
            sender.slow_start_policy(),
            SlowStartPolicy::PlusPlus(h) if h.has_exited()
        ));
        assert!(!sender.in_slow_start());
        assert_eq!(sender.slow_start_threshold(), sender.congestion_window());
    }
}
