//! quinn congestion-controller adapter.
//!
//! quinn drives congestion control through its `Controller` trait; one
//! [`AckHandlerController`] per connection owns that connection's
//! [`AckHandler`] and translates quinn's callbacks into handler events.
//! [`CongestionControllerFactory`] is installed on the endpoint's transport
//! config and builds a controller for every new connection.

use std::any::Any;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use quinn::congestion::{Controller, ControllerFactory};
use quinn_proto::RttEstimator;
use tracing::error;

use super::{new_ack_handler, AckHandler};
use crate::congestion::CongestionOptions;
use crate::protocol::{
    ByteCount, Perspective, VersionNumber, INITIAL_CONGESTION_WINDOW_PACKETS,
};
use crate::rtt::RttStats;
use crate::trace::{ConnectionTracer, TracerFactory};

/// Length of the random id that names a connection's trace.
const TRACE_ID_LEN: usize = 8;

// ─── Controller ─────────────────────────────────────────────────────────────

pub struct AckHandlerController {
    handler: AckHandler,
    factory: Arc<CongestionControllerFactory>,
    /// Shared by every controller of one connection (paths cloned with
    /// `clone_box`); the last one dropped closes the trace.
    connection: Arc<()>,
    initial_window: u64,
    max_datagram_size: ByteCount,
}

impl AckHandlerController {
    pub fn handler(&self) -> &AckHandler {
        &self.handler
    }
}

impl Controller for AckHandlerController {
    fn on_sent(&mut self, now: Instant, bytes: u64, last_packet_number: u64) {
        self.handler.sent_packet(now, last_packet_number, bytes, true);
    }

    fn on_ack(
        &mut self,
        _now: Instant,
        sent: Instant,
        bytes: u64,
        _app_limited: bool,
        _rtt: &RttEstimator,
    ) {
        self.handler.received_ack(sent, bytes);
    }

    fn on_end_acks(
        &mut self,
        now: Instant,
        in_flight: u64,
        _app_limited: bool,
        _largest_packet_num_acked: Option<u64>,
    ) {
        self.handler.end_of_acks_with_in_flight(now, in_flight);
    }

    fn on_congestion_event(
        &mut self,
        now: Instant,
        sent: Instant,
        is_persistent_congestion: bool,
        lost_bytes: u64,
    ) {
        self.handler
            .packets_lost(now, sent, lost_bytes, is_persistent_congestion);
    }

    fn on_mtu_update(&mut self, new_mtu: u16) {
        self.max_datagram_size = ByteCount::from(new_mtu);
        self.handler.set_max_datagram_size(self.max_datagram_size);
    }

    fn window(&self) -> u64 {
        self.handler.congestion_window()
    }

    /// A fresh controller for a new path, writing to the same trace.
    fn clone_box(&self) -> Box<dyn Controller> {
        Box::new(self.factory.controller(
            self.max_datagram_size,
            self.handler.tracer().cloned(),
            Arc::clone(&self.connection),
        ))
    }

    fn initial_window(&self) -> u64 {
        self.initial_window
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Drop for AckHandlerController {
    fn drop(&mut self) {
        if Arc::strong_count(&self.connection) > 1 {
            return;
        }
        if let Some(tracer) = self.handler.tracer() {
            tracer.closed();
        }
    }
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Builds one [`AckHandlerController`] per connection.
pub struct CongestionControllerFactory {
    options: CongestionOptions,
    tracer_factory: Option<Arc<dyn TracerFactory>>,
    perspective: Perspective,
    version: VersionNumber,
}

impl CongestionControllerFactory {
    pub fn new(options: CongestionOptions) -> Self {
        CongestionControllerFactory {
            options,
            tracer_factory: None,
            perspective: Perspective::Server,
            version: VersionNumber::V1,
        }
    }

    /// Give every connection a trace created by `factory`.
    pub fn with_tracer_factory(mut self, factory: Arc<dyn TracerFactory>) -> Self {
        self.tracer_factory = Some(factory);
        self
    }

    pub fn with_perspective(mut self, perspective: Perspective) -> Self {
        self.perspective = perspective;
        self
    }

    pub fn options(&self) -> CongestionOptions {
        self.options
    }

    fn controller(
        self: &Arc<Self>,
        max_datagram_size: ByteCount,
        tracer: Option<Arc<dyn ConnectionTracer>>,
        connection: Arc<()>,
    ) -> AckHandlerController {
        let handler = new_ack_handler(
            0,
            max_datagram_size,
            Arc::new(RttStats::new()),
            self.perspective,
            tracer,
            self.version,
            self.options,
        );
        AckHandlerController {
            initial_window: handler.congestion_window(),
            handler,
            factory: Arc::clone(self),
            connection,
            max_datagram_size,
        }
    }

    /// Create the trace for a new connection, if tracing is enabled.
    ///
    /// quinn does not expose connection ids to the controller, so traces
    /// are named by a random id.
    pub fn new_tracer(&self) -> io::Result<Option<Arc<dyn ConnectionTracer>>> {
        let Some(factory) = &self.tracer_factory else {
            return Ok(None);
        };
        let id: [u8; TRACE_ID_LEN] = rand::random();
        factory.create(self.perspective, &id).map(Some)
    }

    /// Window a controller built by this factory starts with.
    pub fn initial_window(max_datagram_size: ByteCount) -> u64 {
        INITIAL_CONGESTION_WINDOW_PACKETS * max_datagram_size
    }
}

impl ControllerFactory for CongestionControllerFactory {
    fn build(self: Arc<Self>, _now: Instant, current_mtu: u16) -> Box<dyn Controller> {
        let tracer = match self.new_tracer() {
            Ok(tracer) => tracer,
            Err(e) => {
                error!(error = %e, "failed to create qlog file");
                std::process::exit(1);
            }
        };
        Box::new(self.controller(ByteCount::from(current_mtu), tracer, Arc::new(())))
    }
}
