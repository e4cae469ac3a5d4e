//! Frame types (RFC 9000 Section 19).
//!
//! Frames own their payload (`Bytes`) so sent-packet records can hold them
//! until they are acknowledged or handed back to a lost-frame callback for
//! retransmission.
//!
//! Classification: every frame is ack-eliciting except ACK, PADDING and
//! CONNECTION_CLOSE. A packet counts toward bytes in flight when it carries
//! an ack-eliciting frame or PADDING (RFC 9002 Section 2); packets that are
//! only CONNECTION_CLOSE therefore never consume congestion credit.

use crate::types::{ConnectionId, PacketNumber, StreamId};
use bytes::Bytes;
use tinyvec::TinyVec;

pub(crate) const FRAME_TYPE_PADDING: u64 = 0x00;
pub(crate) const FRAME_TYPE_PING: u64 = 0x01;
pub(crate) const FRAME_TYPE_ACK: u64 = 0x02;
pub(crate) const FRAME_TYPE_ACK_ECN: u64 = 0x03;
pub(crate) const FRAME_TYPE_RESET_STREAM: u64 = 0x04;
pub(crate) const FRAME_TYPE_STOP_SENDING: u64 = 0x05;
pub(crate) const FRAME_TYPE_CRYPTO: u64 = 0x06;
pub(crate) const FRAME_TYPE_NEW_TOKEN: u64 = 0x07;
pub(crate) const FRAME_TYPE_STREAM_BASE: u64 = 0x08; // 0x08..=0x0f
pub(crate) const FRAME_TYPE_MAX_DATA: u64 = 0x10;
pub(crate) const FRAME_TYPE_MAX_STREAM_DATA: u64 = 0x11;
pub(crate) const FRAME_TYPE_MAX_STREAMS_BIDI: u64 = 0x12;
pub(crate) const FRAME_TYPE_MAX_STREAMS_UNI: u64 = 0x13;
pub(crate) const FRAME_TYPE_DATA_BLOCKED: u64 = 0x14;
pub(crate) const FRAME_TYPE_STREAM_DATA_BLOCKED: u64 = 0x15;
pub(crate) const FRAME_TYPE_STREAMS_BLOCKED_BIDI: u64 = 0x16;
pub(crate) const FRAME_TYPE_STREAMS_BLOCKED_UNI: u64 = 0x17;
pub(crate) const FRAME_TYPE_NEW_CONNECTION_ID: u64 = 0x18;
pub(crate) const FRAME_TYPE_RETIRE_CONNECTION_ID: u64 = 0x19;
pub(crate) const FRAME_TYPE_PATH_CHALLENGE: u64 = 0x1a;
pub(crate) const FRAME_TYPE_PATH_RESPONSE: u64 = 0x1b;
pub(crate) const FRAME_TYPE_CONNECTION_CLOSE_TRANSPORT: u64 = 0x1c;
pub(crate) const FRAME_TYPE_CONNECTION_CLOSE_APP: u64 = 0x1d;
pub(crate) const FRAME_TYPE_HANDSHAKE_DONE: u64 = 0x1e;

pub(crate) const STREAM_FRAME_BIT_FIN: u64 = 0x01;
pub(crate) const STREAM_FRAME_BIT_LEN: u64 = 0x02;
pub(crate) const STREAM_FRAME_BIT_OFF: u64 = 0x04;

/// A contiguous range of acknowledged packet numbers, inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckRange {
    pub smallest: PacketNumber,
    pub largest: PacketNumber,
}

/// ECN counters reported in ACK_ECN frames (RFC 9000 Section 19.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0: u64,
    pub ect1: u64,
    pub ce: u64,
}

/// ACK frame (RFC 9000 Section 19.3).
///
/// `ack_delay` holds the raw wire value; the receiver scales it by the
/// peer's `ack_delay_exponent` before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acknowledged: PacketNumber,
    pub ack_delay: u64,
    /// Acknowledged ranges, largest first, non-overlapping.
    pub ranges: TinyVec<[AckRange; 8]>,
    pub ecn_counts: Option<EcnCounts>,
}

impl AckFrame {
    /// Acknowledge the single packet `pn`.
    pub fn new(pn: PacketNumber) -> Self {
        let mut ranges = TinyVec::default();
        ranges.push(AckRange { smallest: pn, largest: pn });
        Self { largest_acknowledged: pn, ack_delay: 0, ranges, ecn_counts: None }
    }

    /// Acknowledge an explicit set of packet numbers; adjacent numbers
    /// collapse into ranges.
    pub fn from_packet_numbers(packet_numbers: &[PacketNumber]) -> Self {
        let mut sorted: Vec<PacketNumber> = packet_numbers.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: TinyVec<[AckRange; 8]> = TinyVec::default();
        for &pn in &sorted {
            match ranges.last_mut() {
                Some(range) if range.largest + 1 == pn => range.largest = pn,
                _ => ranges.push(AckRange { smallest: pn, largest: pn }),
            }
        }
        // Wire order is largest range first.
        ranges.reverse();
        let largest = ranges.first().map(|r| r.largest).unwrap_or(0);
        Self { largest_acknowledged: largest, ack_delay: 0, ranges, ecn_counts: None }
    }

    /// Every packet number this frame acknowledges.
    pub fn acked_packet_numbers(&self) -> impl Iterator<Item = PacketNumber> + '_ {
        self.ranges.iter().flat_map(|r| r.smallest..=r.largest)
    }

    /// Whether `pn` falls into any acknowledged range.
    pub fn acknowledges(&self, pn: PacketNumber) -> bool {
        self.ranges.iter().any(|r| r.smallest <= pn && pn <= r.largest)
    }
}

/// RESET_STREAM frame (RFC 9000 Section 19.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStreamFrame {
    pub stream_id: StreamId,
    pub error_code: u64,
    pub final_size: u64,
}

/// STOP_SENDING frame (RFC 9000 Section 19.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSendingFrame {
    pub stream_id: StreamId,
    pub error_code: u64,
}

/// CRYPTO frame (RFC 9000 Section 19.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame {
    pub offset: u64,
    pub data: Bytes,
}

/// NEW_TOKEN frame (RFC 9000 Section 19.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTokenFrame {
    pub token: Bytes,
}

/// STREAM frame (RFC 9000 Section 19.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: Bytes,
    pub fin: bool,
}

/// MAX_DATA frame (RFC 9000 Section 19.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDataFrame {
    pub maximum_data: u64,
}

/// MAX_STREAM_DATA frame (RFC 9000 Section 19.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    pub stream_id: StreamId,
    pub maximum_stream_data: u64,
}

/// MAX_STREAMS frame (RFC 9000 Section 19.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamsFrame {
    pub maximum_streams: u64,
    pub bidirectional: bool,
}

/// DATA_BLOCKED frame (RFC 9000 Section 19.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlockedFrame {
    pub data_limit: u64,
}

/// STREAM_DATA_BLOCKED frame (RFC 9000 Section 19.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDataBlockedFrame {
    pub stream_id: StreamId,
    pub stream_data_limit: u64,
}

/// STREAMS_BLOCKED frame (RFC 9000 Section 19.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamsBlockedFrame {
    pub stream_limit: u64,
    pub bidirectional: bool,
}

/// NEW_CONNECTION_ID frame (RFC 9000 Section 19.15).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence_number: u64,
    pub retire_prior_to: u64,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: [u8; 16],
}

/// RETIRE_CONNECTION_ID frame (RFC 9000 Section 19.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireConnectionIdFrame {
    pub sequence_number: u64,
}

/// PATH_CHALLENGE frame (RFC 9000 Section 19.17).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathChallengeFrame {
    pub data: [u8; 8],
}

/// PATH_RESPONSE frame (RFC 9000 Section 19.18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResponseFrame {
    pub data: [u8; 8],
}

/// CONNECTION_CLOSE frame, both the transport (0x1c) and application (0x1d)
/// variants (RFC 9000 Section 19.19).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame {
    pub error_code: u64,
    /// Type of the frame that triggered the error; absent in the
    /// application variant.
    pub frame_type: Option<u64>,
    pub reason: Bytes,
    pub application: bool,
}

impl ConnectionCloseFrame {
    /// A transport-level close without error (NO_ERROR).
    pub fn no_error() -> Self {
        Self { error_code: 0, frame_type: Some(0), reason: Bytes::new(), application: false }
    }

    /// A transport-level close with the given error code.
    pub fn transport(error_code: u64) -> Self {
        Self { error_code, frame_type: Some(0), reason: Bytes::new(), application: false }
    }
}

/// The tagged union of all frame kinds carried in QUIC packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A run of PADDING bytes; `length` is the number of padding bytes.
    Padding { length: usize },
    Ping,
    Ack(AckFrame),
    ResetStream(ResetStreamFrame),
    StopSending(StopSendingFrame),
    Crypto(CryptoFrame),
    NewToken(NewTokenFrame),
    Stream(StreamFrame),
    MaxData(MaxDataFrame),
    MaxStreamData(MaxStreamDataFrame),
    MaxStreams(MaxStreamsFrame),
    DataBlocked(DataBlockedFrame),
    StreamDataBlocked(StreamDataBlockedFrame),
    StreamsBlocked(StreamsBlockedFrame),
    NewConnectionId(NewConnectionIdFrame),
    RetireConnectionId(RetireConnectionIdFrame),
    PathChallenge(PathChallengeFrame),
    PathResponse(PathResponseFrame),
    ConnectionClose(ConnectionCloseFrame),
    HandshakeDone,
}

impl Frame {
    /// Whether receipt of this frame obliges the peer to acknowledge the
    /// carrying packet (RFC 9002 Section 2).
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Ack(_) | Frame::Padding { .. } | Frame::ConnectionClose(_)
        )
    }
}
