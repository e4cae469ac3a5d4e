//! qlog event sink (draft-ietf-quic-qlog "draft-02" schema).
//!
//! Events accumulate in memory and [`ConnectionQlog::finish`] writes one
//! JSON document: `qlog_version`, a single trace and its `events` array of
//! `{time, name, data}` records. Times are milliseconds relative to the
//! trace's reference time.

use crate::types::ConnectionId;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::time::Instant;

/// Packet type names as qlog spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QlogPacketType {
    #[serde(rename = "initial")]
    Initial,
    #[serde(rename = "handshake")]
    Handshake,
    #[serde(rename = "1RTT")]
    OneRtt,
    #[serde(rename = "0RTT")]
    ZeroRtt,
    #[serde(rename = "retry")]
    Retry,
    #[serde(rename = "version_negotiation")]
    VersionNegotiation,
}

impl QlogPacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QlogPacketType::Initial => "initial",
            QlogPacketType::Handshake => "handshake",
            QlogPacketType::OneRtt => "1RTT",
            QlogPacketType::ZeroRtt => "0RTT",
            QlogPacketType::Retry => "retry",
            QlogPacketType::VersionNegotiation => "version_negotiation",
        }
    }

    pub fn for_level(level: crate::types::EncryptionLevel) -> Self {
        match level {
            crate::types::EncryptionLevel::Initial => QlogPacketType::Initial,
            crate::types::EncryptionLevel::Handshake => QlogPacketType::Handshake,
            crate::types::EncryptionLevel::ZeroRtt => QlogPacketType::ZeroRtt,
            crate::types::EncryptionLevel::App => QlogPacketType::OneRtt,
        }
    }
}

/// Structured connection-lifecycle event sink.
pub trait QlogSink: Send {
    fn connection_started(&mut self, odcid: &ConnectionId);
    fn packet_sent(&mut self, packet_type: QlogPacketType, packet_number: u64, size: usize);
    fn packet_lost(&mut self, packet_type: QlogPacketType, packet_number: u64);
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullQlog;

impl QlogSink for NullQlog {
    fn connection_started(&mut self, _odcid: &ConnectionId) {}
    fn packet_sent(&mut self, _packet_type: QlogPacketType, _packet_number: u64, _size: usize) {}
    fn packet_lost(&mut self, _packet_type: QlogPacketType, _packet_number: u64) {}
}

/// Collects events for one connection and serializes the qlog document.
pub struct ConnectionQlog<W: Write> {
    output: W,
    reference: Instant,
    title: String,
    events: Vec<Value>,
}

impl<W: Write> ConnectionQlog<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            reference: Instant::now(),
            title: String::new(),
            events: Vec::new(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.reference.elapsed().as_secs_f64() * 1000.0
    }

    fn push(&mut self, name: &str, data: Value) {
        self.events.push(json!({
            "time": self.elapsed_ms(),
            "name": name,
            "data": data,
        }));
    }

    /// Write the complete document and flush the writer.
    pub fn finish(mut self) -> io::Result<()> {
        let document = json!({
            "qlog_version": "draft-02",
            "qlog_format": "JSON",
            "traces": [{
                "title": self.title,
                "vantage_point": { "type": "client" },
                "events": self.events,
            }],
        });
        serde_json::to_writer(&mut self.output, &document)
            .map_err(io::Error::from)?;
        self.output.flush()
    }
}

impl<W: Write + Send> QlogSink for ConnectionQlog<W> {
    fn connection_started(&mut self, odcid: &ConnectionId) {
        self.title = format!("connection {}", odcid);
        let data = json!({ "odcid": odcid.to_string() });
        self.push("connectivity:connection_started", data);
    }

    fn packet_sent(&mut self, packet_type: QlogPacketType, packet_number: u64, size: usize) {
        let data = json!({
            "header": {
                "packet_type": packet_type.as_str(),
                "packet_number": packet_number,
            },
            "raw": { "length": size },
        });
        self.push("transport:packet_sent", data);
    }

    fn packet_lost(&mut self, packet_type: QlogPacketType, packet_number: u64) {
        let data = json!({
            "header": {
                "packet_type": packet_type.as_str(),
                "packet_number": packet_number,
            },
        });
        self.push("recovery:packet_lost", data);
    }
}
