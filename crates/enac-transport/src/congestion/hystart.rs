//! # Slow-Start Exit Policies
//!
//! The Reno/Cubic sender asks its policy, on every ack and RTT update,
//! whether slow start should end before the first loss.
//!
//! - [`HybridSlowStart`] — classic HyStart delay-increase detection.
//! - [`HystartPlusPlus`] — RFC 9406: delay increase moves into Conservative
//!   Slow Start for a few rounds, with spurious-exit detection.
//! - `None` — no heuristic; only loss ends slow start.

use std::time::Duration;

use super::HystartType;
use crate::protocol::{ByteCount, PacketNumber};

// ─── Classic HyStart ────────────────────────────────────────────────────────

/// Do not exit slow start below this window (in datagrams).
const HYBRID_START_LOW_WINDOW: ByteCount = 16;
/// RTT samples taken per round before deciding.
const HYBRID_START_MIN_SAMPLES: u32 = 8;
/// Delay threshold is min_rtt / 2^3, clamped below.
const HYBRID_START_DELAY_FACTOR_EXP: u32 = 3;
const HYBRID_START_DELAY_MIN_THRESHOLD: Duration = Duration::from_millis(4);
const HYBRID_START_DELAY_MAX_THRESHOLD: Duration = Duration::from_millis(16);

/// Delay-based slow-start exit.
#[derive(Debug, Clone, Default)]
pub struct HybridSlowStart {
    end_packet_number: Option<PacketNumber>,
    last_sent_packet_number: Option<PacketNumber>,
    started: bool,
    current_min_rtt: Option<Duration>,
    rtt_sample_count: u32,
    hystart_found: bool,
}

impl HybridSlowStart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_packet_sent(&mut self, packet_number: PacketNumber) {
        self.last_sent_packet_number = Some(packet_number);
    }

    /// A round ends once a packet sent after the round started is acked.
    pub fn on_packet_acked(&mut self, acked: PacketNumber) {
        if self.is_end_of_round(acked) {
            self.started = false;
        }
    }

    fn is_end_of_round(&self, acked: PacketNumber) -> bool {
        match self.end_packet_number {
            Some(end) => end < acked,
            None => true,
        }
    }

    fn start_receive_round(&mut self) {
        self.end_packet_number = self.last_sent_packet_number;
        self.current_min_rtt = None;
        self.rtt_sample_count = 0;
        self.started = true;
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn restart(&mut self) {
        self.started = false;
        self.hystart_found = false;
    }

    /// `congestion_window` is in datagrams.
    pub fn should_exit_slow_start(
        &mut self,
        latest_rtt: Duration,
        min_rtt: Duration,
        congestion_window: ByteCount,
    ) -> bool {
        if !self.started {
            self.start_receive_round();
        }
        if self.hystart_found {
            return true;
        }

        self.rtt_sample_count += 1;
        if self.rtt_sample_count <= HYBRID_START_MIN_SAMPLES {
            self.current_min_rtt = Some(match self.current_min_rtt {
                Some(current) => current.min(latest_rtt),
                None => latest_rtt,
            });
        }

        if self.rtt_sample_count == HYBRID_START_MIN_SAMPLES {
            let threshold = (min_rtt / 2u32.pow(HYBRID_START_DELAY_FACTOR_EXP)).clamp(
                HYBRID_START_DELAY_MIN_THRESHOLD,
                HYBRID_START_DELAY_MAX_THRESHOLD,
            );
            if self
                .current_min_rtt
                .is_some_and(|current| current > min_rtt + threshold)
            {
                self.hystart_found = true;
            }
        }

        congestion_window >= HYBRID_START_LOW_WINDOW && self.hystart_found
    }
}

// ─── HyStart++ ──────────────────────────────────────────────────────────────

const MIN_RTT_THRESH: Duration = Duration::from_millis(4);
const MAX_RTT_THRESH: Duration = Duration::from_millis(16);
const MIN_RTT_DIVISOR: u32 = 8;
const N_RTT_SAMPLE: u32 = 8;
/// Growth divisor in Conservative Slow Start.
const CSS_GROWTH_DIVISOR: ByteCount = 4;
/// Rounds spent in Conservative Slow Start before giving up on slow start.
const CSS_ROUNDS: u32 = 5;
/// Cap on growth per ack, in datagrams.
const HYSTART_L: ByteCount = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HystartPhase {
    StandardSlowStart,
    ConservativeSlowStart,
    Exited,
}

/// RFC 9406 HyStart++.
#[derive(Debug, Clone)]
pub struct HystartPlusPlus {
    phase: HystartPhase,
    last_round_min_rtt: Option<Duration>,
    current_round_min_rtt: Option<Duration>,
    rtt_sample_count: u32,
    last_sent_packet_number: PacketNumber,
    max_acked_packet_number: PacketNumber,
    window_end: Option<PacketNumber>,
    css_round_count: u32,
    css_baseline_min_rtt: Option<Duration>,
}

impl Default for HystartPlusPlus {
    fn default() -> Self {
        Self::new()
    }
}

impl HystartPlusPlus {
    pub fn new() -> Self {
        HystartPlusPlus {
            phase: HystartPhase::StandardSlowStart,
            last_round_min_rtt: None,
            current_round_min_rtt: None,
            rtt_sample_count: 0,
            last_sent_packet_number: 0,
            max_acked_packet_number: 0,
            window_end: None,
            css_round_count: 0,
            css_baseline_min_rtt: None,
        }
    }

    pub fn phase(&self) -> HystartPhase {
        self.phase
    }

    pub fn has_exited(&self) -> bool {
        self.phase == HystartPhase::Exited
    }

    pub fn on_packet_sent(&mut self, packet_number: PacketNumber) {
        self.last_sent_packet_number = packet_number;
        if self.window_end.is_none() {
            self.window_end = Some(packet_number);
        }
    }

    pub fn on_packet_acked(&mut self, packet_number: PacketNumber, rtt: Duration) {
        if self.has_exited() {
            return;
        }
        self.max_acked_packet_number = self.max_acked_packet_number.max(packet_number);
        self.current_round_min_rtt = Some(match self.current_round_min_rtt {
            Some(current) => current.min(rtt),
            None => rtt,
        });
        self.rtt_sample_count += 1;

        match self.phase {
            HystartPhase::StandardSlowStart => {
                if self.rtt_sample_count < N_RTT_SAMPLE {
                    return;
                }
                let (Some(current), Some(last)) = (self.current_round_min_rtt, self.last_round_min_rtt)
                else {
                    return;
                };
                let thresh = (last / MIN_RTT_DIVISOR).clamp(MIN_RTT_THRESH, MAX_RTT_THRESH);
                if current >= last + thresh {
                    self.css_baseline_min_rtt = Some(current);
                    self.phase = HystartPhase::ConservativeSlowStart;
                }
            }
            HystartPhase::ConservativeSlowStart => {
                if self.rtt_sample_count >= N_RTT_SAMPLE
                    && self
                        .css_baseline_min_rtt
                        .is_some_and(|baseline| self.current_round_min_rtt.is_some_and(|c| c < baseline))
                {
                    // The delay increase was spurious.
                    self.css_baseline_min_rtt = None;
                    self.css_round_count = 0;
                    self.phase = HystartPhase::StandardSlowStart;
                }
            }
            HystartPhase::Exited => {}
        }
    }

    /// Called once per ack frame; advances rounds.
    pub fn on_ack_frame_end(&mut self) {
        if self.has_exited() {
            return;
        }
        if self
            .window_end
            .is_some_and(|end| self.max_acked_packet_number > end)
        {
            self.window_end = Some(self.last_sent_packet_number);
            self.last_round_min_rtt = self.current_round_min_rtt;
            self.current_round_min_rtt = None;
            self.rtt_sample_count = 0;

            if self.phase == HystartPhase::ConservativeSlowStart {
                self.css_round_count += 1;
                if self.css_round_count >= CSS_ROUNDS {
                    self.css_round_count = 0;
                    self.phase = HystartPhase::Exited;
                }
            }
        }
    }

    pub fn on_congestion_event(&mut self) {
        self.window_end = None;
        self.phase = HystartPhase::Exited;
    }

    pub fn slow_start_increment(&self, acked_bytes: ByteCount, max_datagram_size: ByteCount) -> ByteCount {
        let cap = HYSTART_L * max_datagram_size;
        match self.phase {
            HystartPhase::StandardSlowStart => acked_bytes.min(cap),
            HystartPhase::ConservativeSlowStart => (acked_bytes / CSS_GROWTH_DIVISOR).min(cap),
            HystartPhase::Exited => 0,
        }
    }
}

// ─── Policy ─────────────────────────────────────────────────────────────────

/// The slow-start exit policy injected into the Reno/Cubic sender.
#[derive(Debug, Clone)]
pub enum SlowStartPolicy {
    Standard(HybridSlowStart),
    PlusPlus(HystartPlusPlus),
    None,
}

impl SlowStartPolicy {
    pub fn new(kind: HystartType) -> Self {
        match kind {
            HystartType::Standard => SlowStartPolicy::Standard(HybridSlowStart::new()),
            HystartType::PlusPlus => SlowStartPolicy::PlusPlus(HystartPlusPlus::new()),
            HystartType::None => SlowStartPolicy::None,
        }
    }

    pub fn on_packet_sent(&mut self, packet_number: PacketNumber) {
        match self {
            SlowStartPolicy::Standard(h) => h.on_packet_sent(packet_number),
            SlowStartPolicy::PlusPlus(h) => h.on_packet_sent(packet_number),
            SlowStartPolicy::None => {}
        }
    }

    pub fn on_packet_acked(&mut self, packet_number: PacketNumber, latest_rtt: Duration) {
        match self {
            SlowStartPolicy::Standard(h) => h.on_packet_acked(packet_number),
            SlowStartPolicy::PlusPlus(h) => h.on_packet_acked(packet_number, latest_rtt),
            SlowStartPolicy::None => {}
        }
    }

    pub fn on_rtt_updated(&mut self) {
        if let SlowStartPolicy::PlusPlus(h) = self {
            h.on_ack_frame_end();
        }
    }

    /// `congestion_window` is in datagrams.
    pub fn should_exit_slow_start(
        &mut self,
        latest_rtt: Duration,
        min_rtt: Duration,
        congestion_window: ByteCount,
    ) -> bool {
        match self {
            SlowStartPolicy::Standard(h) => {
                h.should_exit_slow_start(latest_rtt, min_rtt, congestion_window)
            }
            SlowStartPolicy::PlusPlus(h) => h.has_exited(),
            SlowStartPolicy::None => false,
        }
    }

    /// Window growth in slow start for one ack.
    pub fn slow_start_increment(&self, acked_bytes: ByteCount, max_datagram_size: ByteCount) -> ByteCount {
        match self {
            SlowStartPolicy::PlusPlus(h) => h.slow_start_increment(acked_bytes, max_datagram_size),
            _ => max_datagram_size,
        }
    }

    pub fn on_congestion_event(&mut self) {
        if let SlowStartPolicy::PlusPlus(h) = self {
            h.on_congestion_event();
        }
    }

    pub fn restart(&mut self) {
        match self {
            SlowStartPolicy::Standard(h) => h.restart(),
            SlowStartPolicy::PlusPlus(h) => *h = HystartPlusPlus::new(),
            SlowStartPolicy::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn hybrid_detects_delay_increase() {
        let mut hs = HybridSlowStart::new();
        hs.on_packet_sent(100);
        let min_rtt = ms(60);
        let mut exited = false;
        // Samples well above min_rtt + max(60/8, 4) = 67.5ms
        for _ in 0..HYBRID_START_MIN_SAMPLES {
            exited = hs.should_exit_slow_start(ms(80), min_rtt, 20);
        }
        assert!(exited);
    }

    #[test]
    fn hybrid_ignores_small_delay_increase() {
        let mut hs = HybridSlowStart::new();
        hs.on_packet_sent(100);
        for _ in 0..20 {
            assert!(!hs.should_exit_slow_start(ms(62), ms(60), 20));
        }
    }

    #[test]
    fn hybrid_respects_low_window() {
        let mut hs = HybridSlowStart::new();
        for _ in 0..HYBRID_START_MIN_SAMPLES {
            assert!(!hs.should_exit_slow_start(ms(200), ms(60), 4));
        }
        // Once the window is large enough the earlier finding applies.
        assert!(hs.should_exit_slow_start(ms(200), ms(60), 16));
    }

    #[test]
    fn hybrid_round_ends_after_end_packet() {
        let mut hs = HybridSlowStart::new();
        hs.on_packet_sent(10);
        hs.should_exit_slow_start(ms(50), ms(50), 20);
        assert!(hs.started());
        hs.on_packet_acked(10);
        assert!(hs.started());
        hs.on_packet_acked(11);
        assert!(!hs.started());
    }

    /// Drive one round of HyStart++: `samples` acks with `rtt`, then close the round.
    fn run_round(h: &mut HystartPlusPlus, next_pn: &mut PacketNumber, rtt: Duration) {
        let first = *next_pn;
        for i in 0..N_RTT_SAMPLE as u64 {
            h.on_packet_sent(first + i);
        }
        for i in 0..N_RTT_SAMPLE as u64 {
            h.on_packet_acked(first + i, rtt);
        }
        *next_pn += N_RTT_SAMPLE as u64;
        h.on_packet_sent(*next_pn);
        *next_pn += 1;
        h.on_ack_frame_end();
    }

    #[test]
    fn plusplus_enters_css_and_exits_after_rounds() {
        let mut h = HystartPlusPlus::new();
        let mut pn = 0;
        run_round(&mut h, &mut pn, ms(30));
        run_round(&mut h, &mut pn, ms(31));
        assert_eq!(h.phase(), HystartPhase::StandardSlowStart);

        run_round(&mut h, &mut pn, ms(40));
        assert_eq!(h.phase(), HystartPhase::ConservativeSlowStart);

        for _ in 1..CSS_ROUNDS {
            run_round(&mut h, &mut pn, ms(41));
        }
        assert_eq!(h.phase(), HystartPhase::Exited);
        assert!(h.has_exited());
    }

    #[test]
    fn plusplus_spurious_css_returns_to_slow_start() {
        let mut h = HystartPlusPlus::new();
        let mut pn = 0;
        run_round(&mut h, &mut pn, ms(30));
        run_round(&mut h, &mut pn, ms(40));
        assert_eq!(h.phase(), HystartPhase::ConservativeSlowStart);
        run_round(&mut h, &mut pn, ms(35));
        assert_eq!(h.phase(), HystartPhase::StandardSlowStart);
    }

    #[test]
    fn plusplus_css_growth_is_quartered() {
        let mut h = HystartPlusPlus::new();
        assert_eq!(h.slow_start_increment(1200, 1200), 1200);
        h.phase = HystartPhase::ConservativeSlowStart;
        assert_eq!(h.slow_start_increment(1200, 1200), 300);
        h.on_congestion_event();
        assert_eq!(h.slow_start_increment(1200, 1200), 0);
    }

    #[test]
    fn none_policy_never_exits() {
        let mut p = SlowStartPolicy::new(HystartType::None);
        for _ in 0..100 {
            assert!(!p.should_exit_slow_start(ms(500), ms(10), 1000));
        }
        assert_eq!(p.slow_start_increment(5000, 1200), 1200);
    }
}
