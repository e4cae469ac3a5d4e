//! Error types for the connection engine.
//!
//! Two layers: [`TransportError`] carries the RFC 9000 Section 20 error codes
//! that travel in CONNECTION_CLOSE frames, and [`Error`] covers everything the
//! engine itself can report (malformed packets, unknown versions, local
//! argument errors, timeouts, peer closes).

use bytes::Bytes;
use thiserror::Error;

/// Transport error codes per RFC 9000 Section 20.1.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No error (0x00).
    #[error("no error")]
    NoError,

    /// Internal error (0x01).
    #[error("internal error")]
    InternalError,

    /// Connection refused (0x02).
    #[error("connection refused")]
    ConnectionRefused,

    /// Flow control error (0x03).
    #[error("flow control error")]
    FlowControlError,

    /// Stream limit error (0x04).
    #[error("stream limit error")]
    StreamLimitError,

    /// Stream state error (0x05).
    #[error("stream state error")]
    StreamStateError,

    /// Final size error (0x06).
    #[error("final size error")]
    FinalSizeError,

    /// Frame encoding error (0x07).
    #[error("frame encoding error")]
    FrameEncodingError,

    /// Transport parameter error (0x08).
    #[error("transport parameter error")]
    TransportParameterError,

    /// Connection ID limit error (0x09).
    #[error("connection ID limit error")]
    ConnectionIdLimitError,

    /// Protocol violation (0x0A).
    #[error("protocol violation")]
    ProtocolViolation,

    /// Invalid token (0x0B).
    #[error("invalid token")]
    InvalidToken,

    /// Application error (0x0C).
    #[error("application error")]
    ApplicationError,

    /// Crypto buffer exceeded (0x0D).
    #[error("crypto buffer exceeded")]
    CryptoBufferExceeded,

    /// Key update error (0x0E).
    #[error("key update error")]
    KeyUpdateError,

    /// AEAD limit reached (0x0F).
    #[error("AEAD limit reached")]
    AeadLimitReached,

    /// No viable path (0x10).
    #[error("no viable path")]
    NoViablePath,

    /// TLS alert (0x0100-0x01FF).
    #[error("crypto error: {0:#x}")]
    Crypto(u16),
}

impl TransportError {
    /// Wire-format error code for CONNECTION_CLOSE frames.
    pub fn to_wire(&self) -> u64 {
        match self {
            TransportError::NoError => 0x00,
            TransportError::InternalError => 0x01,
            TransportError::ConnectionRefused => 0x02,
            TransportError::FlowControlError => 0x03,
            TransportError::StreamLimitError => 0x04,
            TransportError::StreamStateError => 0x05,
            TransportError::FinalSizeError => 0x06,
            TransportError::FrameEncodingError => 0x07,
            TransportError::TransportParameterError => 0x08,
            TransportError::ConnectionIdLimitError => 0x09,
            TransportError::ProtocolViolation => 0x0A,
            TransportError::InvalidToken => 0x0B,
            TransportError::ApplicationError => 0x0C,
            TransportError::CryptoBufferExceeded => 0x0D,
            TransportError::KeyUpdateError => 0x0E,
            TransportError::AeadLimitReached => 0x0F,
            TransportError::NoViablePath => 0x10,
            TransportError::Crypto(code) => 0x0100 + (*code as u64),
        }
    }

    /// Inverse of [`to_wire`](Self::to_wire); unknown codes map to
    /// `InternalError`.
    pub fn from_wire(code: u64) -> Self {
        match code {
            0x00 => TransportError::NoError,
            0x01 => TransportError::InternalError,
            0x02 => TransportError::ConnectionRefused,
            0x03 => TransportError::FlowControlError,
            0x04 => TransportError::StreamLimitError,
            0x05 => TransportError::StreamStateError,
            0x06 => TransportError::FinalSizeError,
            0x07 => TransportError::FrameEncodingError,
            0x08 => TransportError::TransportParameterError,
            0x09 => TransportError::ConnectionIdLimitError,
            0x0A => TransportError::ProtocolViolation,
            0x0B => TransportError::InvalidToken,
            0x0C => TransportError::ApplicationError,
            0x0D => TransportError::CryptoBufferExceeded,
            0x0E => TransportError::KeyUpdateError,
            0x0F => TransportError::AeadLimitReached,
            0x10 => TransportError::NoViablePath,
            0x0100..=0x01FF => TransportError::Crypto(((code - 0x0100) & 0xFF) as u16),
            _ => TransportError::InternalError,
        }
    }
}

/// Errors produced by the connection engine.
///
/// Parse failures are values, never panics: the receive loop discards an
/// [`Error::InvalidPacket`] or [`Error::UnknownVersion`] datagram without
/// tearing down the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed packet bytes; silently discarded at the receive boundary.
    #[error("invalid packet")]
    InvalidPacket,

    /// Long header carried a version this endpoint does not know.
    #[error("unknown version {0:#010x}")]
    UnknownVersion(u32),

    /// Malformed frame inside an otherwise valid packet.
    #[error("frame encoding error")]
    FrameEncoding,

    /// Peer violated the protocol; closes the connection with the carried code.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Caller supplied an unusable argument (blank ALPN, version too old,
    /// over-long connection ID, malformed authority).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The handshake did not complete within the connect timeout.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// The peer closed the connection.
    #[error("connection closed by peer (error {error_code:#x})")]
    PeerConnectionClose {
        /// Wire error code from the CONNECTION_CLOSE frame.
        error_code: u64,
        /// Human-readable reason phrase, possibly empty.
        reason: Bytes,
    },
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
