//! # Diagnostic Traces
//!
//! Per-connection structured event log in the qlog JSON-SEQ format
//! (draft-ietf-quic-qlog-main-schema). Every record is prefixed with the
//! ASCII record separator `0x1e` and terminated by a newline.
//!
//! Trace sinks are handed to the congestion code as
//! `Arc<dyn ConnectionTracer>`; the file-creating capability is injected as a
//! [`TracerFactory`] so the core never performs ambient file I/O.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::protocol::{ByteCount, PacketNumber, Perspective};
use crate::rtt::RttStats;

const RECORD_SEPARATOR: u8 = 0x1e;

// ─── Congestion State ───────────────────────────────────────────────────────

/// Congestion controller state as reported to traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    Recovery,
    ApplicationLimited,
}

// ─── Tracer Interface ───────────────────────────────────────────────────────

/// Receives connection lifecycle events. All hooks default to no-ops.
pub trait ConnectionTracer: Send + Sync {
    fn sent_packet(&self, _packet_number: PacketNumber, _size: ByteCount, _bytes_in_flight: ByteCount) {}

    fn acked_packet(&self, _packet_number: PacketNumber, _size: ByteCount) {}

    fn lost_packet(&self, _packet_number: PacketNumber, _lost_bytes: ByteCount) {}

    fn updated_metrics(
        &self,
        _rtt: &RttStats,
        _congestion_window: ByteCount,
        _bytes_in_flight: ByteCount,
        _packets_in_flight: usize,
    ) {
    }

    fn updated_congestion_state(&self, _state: CongestionState) {}

    fn updated_max_datagram_size(&self, _size: ByteCount) {}

    fn closed(&self) {}
}

/// Creates one tracer per connection.
pub trait TracerFactory: Send + Sync {
    fn create(
        &self,
        perspective: Perspective,
        connection_id: &[u8],
    ) -> io::Result<Arc<dyn ConnectionTracer>>;
}

// ─── qlog Writer ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Event<'a> {
    time: f64,
    name: &'a str,
    data: serde_json::Value,
}

/// Writes qlog events to any byte sink.
pub struct QlogTracer {
    start: Instant,
    out: Mutex<Box<dyn Write + Send>>,
}

impl QlogTracer {
    /// Create a tracer and write the JSON-SEQ header.
    pub fn new(
        out: Box<dyn Write + Send>,
        perspective: Perspective,
        connection_id: &[u8],
    ) -> io::Result<Self> {
        let reference_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let header = json!({
            "qlog_version": "0.3",
            "qlog_format": "JSON-SEQ",
            "title": "enac qlog",
            "trace": {
                "vantage_point": { "type": perspective.as_str() },
                "common_fields": {
                    "ODCID": hex::encode(connection_id),
                    "reference_time": reference_time,
                    "time_format": "relative",
                },
            },
        });

        let tracer = QlogTracer {
            start: Instant::now(),
            out: Mutex::new(out),
        };
        tracer.write_record(&header)?;
        Ok(tracer)
    }

    fn write_record<T: Serialize>(&self, record: &T) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(&[RECORD_SEPARATOR])?;
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")
    }

    fn event(&self, name: &str, data: serde_json::Value) {
        let event = Event {
            time: self.start.elapsed().as_secs_f64() * 1000.0,
            name,
            data,
        };
        if let Err(e) = self.write_record(&event) {
            tracing::warn!(error = %e, event = name, "failed to write qlog event");
        }
    }
}

impl ConnectionTracer for QlogTracer {
    fn sent_packet(&self, packet_number: PacketNumber, size: ByteCount, bytes_in_flight: ByteCount) {
        self.event(
            "transport:packet_sent",
            json!({
                "header": { "packet_number": packet_number },
                "raw": { "length": size },
                "bytes_in_flight": bytes_in_flight,
            }),
        );
    }

    fn acked_packet(&self, packet_number: PacketNumber, size: ByteCount) {
        self.event(
            "recovery:packet_acked",
            json!({ "header": { "packet_number": packet_number }, "raw": { "length": size } }),
        );
    }

    fn lost_packet(&self, packet_number: PacketNumber, lost_bytes: ByteCount) {
        self.event(
            "recovery:packet_lost",
            json!({ "header": { "packet_number": packet_number }, "raw": { "length": lost_bytes } }),
        );
    }

    fn updated_metrics(
        &self,
        rtt: &RttStats,
        congestion_window: ByteCount,
        bytes_in_flight: ByteCount,
        packets_in_flight: usize,
    ) {
        self.event(
            "recovery:metrics_updated",
            json!({
                "min_rtt": rtt.min_rtt().as_secs_f64() * 1000.0,
                "smoothed_rtt": rtt.smoothed_rtt().as_secs_f64() * 1000.0,
                "latest_rtt": rtt.latest_rtt().as_secs_f64() * 1000.0,
                "rtt_variance": rtt.mean_deviation().as_secs_f64() * 1000.0,
                "congestion_window": congestion_window,
                "bytes_in_flight": bytes_in_flight,
                "packets_in_flight": packets_in_flight,
            }),
        );
    }

    fn updated_congestion_state(&self, state: CongestionState) {
        self.event("recovery:congestion_state_updated", json!({ "new": state }));
    }

    fn updated_max_datagram_size(&self, size: ByteCount) {
        self.event("transport:parameters_set", json!({ "max_udp_payload_size": size }));
    }

    fn closed(&self) {
        self.event("transport:connection_closed", json!({ "owner": "local" }));
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = out.flush() {
            tracing::warn!(error = %e, "failed to flush qlog");
        }
    }
}

impl Drop for QlogTracer {
    fn drop(&mut self) {
        let out = self.out.get_mut().unwrap_or_else(|e| e.into_inner());
        let _ = out.flush();
    }
}

// ─── File Factory ───────────────────────────────────────────────────────────

/// Creates `<perspective>_<hex id>.qlog` files in a directory.
#[derive(Debug, Clone)]
pub struct QlogFileFactory {
    dir: PathBuf,
}

impl QlogFileFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        QlogFileFactory { dir: dir.into() }
    }

    /// Factory writing into the process working directory.
    pub fn working_dir() -> Self {
        Self::new(".")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(perspective: Perspective, connection_id: &[u8]) -> String {
        format!("{}_{}.qlog", perspective.as_str(), hex::encode(connection_id))
    }
}

impl TracerFactory for QlogFileFactory {
    fn create(
        &self,
        perspective: Perspective,
        connection_id: &[u8],
    ) -> io::Result<Arc<dyn ConnectionTracer>> {
        let path = self.dir.join(Self::file_name(perspective, connection_id));
        let file = File::create(&path)?;
        tracing::info!(path = %path.display(), "creating qlog file");
        let tracer = QlogTracer::new(Box::new(BufWriter::new(file)), perspective, connection_id)?;
        Ok(Arc::new(tracer))
    }
}
