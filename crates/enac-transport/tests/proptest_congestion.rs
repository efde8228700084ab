//! Property-based tests for the congestion strategies and the ack-handler
//! pair.
//!
//! Random interleavings of sends, acks, losses and timeouts must keep the
//! window inside its bounds and the in-flight count honest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use enac_transport::ackhandler::new_ack_handler;
use enac_transport::congestion::{
    new_congestion_handler, CongestionControlType, CongestionOptions, HystartType,
};
use enac_transport::protocol::{
    Perspective, VersionNumber, INITIAL_MAX_DATAGRAM_SIZE, MAX_CONGESTION_WINDOW_PACKETS,
    MIN_CONGESTION_WINDOW_PACKETS,
};
use enac_transport::rtt::RttStats;
use proptest::prelude::*;

const MDS: u64 = INITIAL_MAX_DATAGRAM_SIZE;

#[derive(Debug, Clone)]
enum Event {
    Send(u64),
    Ack { rtt_ms: u64 },
    Lose,
    Timeout(bool),
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        4 => (1u64..=MDS).prop_map(Event::Send),
        4 => (1u64..300).prop_map(|rtt_ms| Event::Ack { rtt_ms }),
        1 => Just(Event::Lose),
        1 => any::<bool>().prop_map(Event::Timeout),
    ]
}

fn options() -> impl Strategy<Value = CongestionOptions> {
    (
        prop_oneof![
            Just(CongestionControlType::NewReno),
            Just(CongestionControlType::Cubic),
        ],
        prop_oneof![
            Just(HystartType::Standard),
            Just(HystartType::PlusPlus),
            Just(HystartType::None),
        ],
    )
        .prop_map(|(control_type, hystart)| CongestionOptions {
            control_type,
            hystart,
        })
}

// ─── Window Bounds ──────────────────────────────────────────────────────────

proptest! {
    /// The window stays within [min, max] and a loss never grows it.
    #[test]
    fn window_stays_bounded(
        options in options(),
        events in prop::collection::vec(event(), 1..400),
    ) {
        let rtt = Arc::new(RttStats::new());
        let mut cc = new_congestion_handler(rtt.clone(), MDS, options, None);
        let start = Instant::now();
        let mut now = start;
        let mut next_pn = 0u64;
        let mut acked_pn = 0u64;
        let mut in_flight = 0u64;

        for event in events {
            now += Duration::from_millis(1);
            match event {
                Event::Send(size) => {
                    cc.on_packet_sent(now, in_flight, next_pn, size, true);
                    next_pn += 1;
                    in_flight += size;
                }
                Event::Ack { rtt_ms } => {
                    if acked_pn >= next_pn {
                        continue;
                    }
                    rtt.update_rtt(Duration::from_millis(rtt_ms));
                    let acked = in_flight.min(MDS);
                    cc.on_packet_acked(acked_pn, acked, in_flight, now);
                    cc.on_rtt_updated();
                    acked_pn += 1;
                    in_flight -= acked;
                }
                Event::Lose => {
                    if acked_pn >= next_pn {
                        continue;
                    }
                    let before = cc.congestion_window();
                    let lost = in_flight.min(MDS);
                    cc.on_packet_lost(acked_pn, lost, in_flight);
                    acked_pn += 1;
                    in_flight -= lost;
                    prop_assert!(cc.congestion_window() <= before);
                }
                Event::Timeout(retransmitted) => {
                    cc.on_retransmission_timeout(retransmitted);
                }
            }
            let cwnd = cc.congestion_window();
            prop_assert!(cwnd >= MIN_CONGESTION_WINDOW_PACKETS * MDS, "cwnd {} below floor", cwnd);
            prop_assert!(cwnd <= MAX_CONGESTION_WINDOW_PACKETS * MDS, "cwnd {} above cap", cwnd);
            prop_assert_eq!(cc.can_send(in_flight), in_flight < cwnd);
        }
    }
}

// ─── Bytes In Flight ────────────────────────────────────────────────────────

proptest! {
    /// Bytes in flight never exceed what was sent and not yet acked or lost,
    /// whatever order acks and losses arrive in.
    #[test]
    fn bytes_in_flight_never_exceed_outstanding(
        options in options(),
        events in prop::collection::vec(event(), 1..300),
    ) {
        let mut handler = new_ack_handler(
            0,
            MDS,
            Arc::new(RttStats::new()),
            Perspective::Server,
            None,
            VersionNumber::V1,
            options,
        );
        let start = Instant::now();
        let mut now = start;
        // (sent_time, size) of packets not yet acked or lost
        let mut outstanding: Vec<(Instant, u64)> = Vec::new();
        let mut next_pn = 0u64;

        for event in events {
            now += Duration::from_millis(1);
            match event {
                Event::Send(size) => {
                    handler.sent_packet(now, next_pn, size, true);
                    outstanding.push((now, size));
                    next_pn += 1;
                }
                Event::Ack { rtt_ms } => {
                    if outstanding.is_empty() {
                        continue;
                    }
                    // any outstanding packet, not just the oldest
                    let idx = (rtt_ms as usize) % outstanding.len();
                    let (sent, size) = outstanding.remove(idx);
                    handler.received_ack(sent, size);
                    handler.end_of_acks(now);
                }
                Event::Lose => {
                    if outstanding.is_empty() {
                        continue;
                    }
                    let (sent, size) = outstanding.remove(0);
                    handler.packets_lost(now, sent, size, false);
                }
                Event::Timeout(retransmitted) => {
                    handler.retransmission_timeout(retransmitted);
                }
            }
            let outstanding_bytes: u64 = outstanding.iter().map(|p| p.1).sum();
            prop_assert!(
                handler.bytes_in_flight() <= outstanding_bytes,
                "{} in flight, {} outstanding",
                handler.bytes_in_flight(),
                outstanding_bytes
            );
        }
    }
}
