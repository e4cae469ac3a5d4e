//! Core wire-level types shared across the engine: connection IDs, stream
//! IDs, packet numbers, encryption levels and the variable-length integer
//! codec of RFC 9000 Section 16.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes};
use rand::RngCore;

/// Maximum connection ID length (RFC 9000 Section 17.2).
pub const MAX_CID_LENGTH: usize = 20;

/// Largest value representable as a variable-length integer (2^62 - 1).
pub const VARINT_MAX: u64 = (1u64 << 62) - 1;

/// Packet numbers are 62-bit integers, monotone per packet number space.
pub type PacketNumber = u64;

// ============================================================================
// Variable-length integers (RFC 9000 Section 16)
// ============================================================================

/// Decode a variable-length integer from `buf`.
///
/// The two most significant bits of the first byte select a 1, 2, 4 or
/// 8 byte encoding. Fails with [`Error::InvalidPacket`] on a short buffer.
pub fn read_varint<B: Buf>(buf: &mut B) -> Result<u64> {
    if !buf.has_remaining() {
        return Err(Error::InvalidPacket);
    }
    let first = buf.get_u8();
    let len = 1usize << (first >> 6);
    if buf.remaining() < len - 1 {
        return Err(Error::InvalidPacket);
    }
    let mut value = (first & 0x3f) as u64;
    for _ in 1..len {
        value = (value << 8) | buf.get_u8() as u64;
    }
    Ok(value)
}

/// Encode `value` as a variable-length integer.
///
/// Uses the shortest encoding. `value` must not exceed [`VARINT_MAX`]; the
/// engine never produces larger values from internal state.
pub fn write_varint<B: BufMut>(buf: &mut B, value: u64) {
    debug_assert!(value <= VARINT_MAX);
    if value < 0x40 {
        buf.put_u8(value as u8);
    } else if value < 0x4000 {
        buf.put_u16(0x4000 | value as u16);
    } else if value < 0x4000_0000 {
        buf.put_u32(0x8000_0000 | value as u32);
    } else {
        buf.put_u64(0xc000_0000_0000_0000 | value);
    }
}

/// Encoded size of `value` as a variable-length integer.
pub fn varint_size(value: u64) -> usize {
    if value < 0x40 {
        1
    } else if value < 0x4000 {
        2
    } else if value < 0x4000_0000 {
        4
    } else {
        8
    }
}

// ============================================================================
// Connection ID (RFC 8999 Section 5.3, RFC 9000 Section 5.1)
// ============================================================================

/// An opaque connection identifier of 0..=20 bytes.
///
/// Connection IDs route packets to a connection independent of addressing.
/// Zero-length IDs are permitted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    bytes: Bytes,
}

impl ConnectionId {
    /// Wrap `bytes` as a connection ID. Fails on over-long input.
    pub fn new(bytes: Bytes) -> Result<Self> {
        if bytes.len() > MAX_CID_LENGTH {
            return Err(Error::InvalidArgument("connection ID exceeds 20 bytes"));
        }
        Ok(Self { bytes })
    }

    /// Copying constructor for borrowed data.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        Self::new(Bytes::copy_from_slice(slice))
    }

    /// Generate a fresh random ID of `len` bytes.
    pub fn random(len: usize) -> Self {
        debug_assert!(len <= MAX_CID_LENGTH);
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes: Bytes::from(bytes) }
    }

    /// The zero-length connection ID.
    pub fn empty() -> Self {
        Self { bytes: Bytes::new() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl core::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ConnectionId({})", self)
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in &self.bytes[..] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// ============================================================================
// Stream ID (RFC 9000 Section 2.1)
// ============================================================================

/// Stream identifier. The two least significant bits encode the initiator
/// (bit 0: 0 = client) and directionality (bit 1: 0 = bidirectional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_bidirectional(&self) -> bool {
        self.0 & 0x02 == 0
    }

    pub fn is_unidirectional(&self) -> bool {
        !self.is_bidirectional()
    }

    pub fn is_client_initiated(&self) -> bool {
        self.0 & 0x01 == 0
    }

    pub fn is_server_initiated(&self) -> bool {
        !self.is_client_initiated()
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Encryption levels and packet number spaces (RFC 9000 Section 12.3)
// ============================================================================

/// Encryption level of a packet; each level has its own keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionLevel {
    Initial,
    ZeroRtt,
    Handshake,
    App,
}

/// Independent packet number spaces. Packet numbers are never reused within
/// a space nor shared across spaces; 0-RTT and 1-RTT packets share the
/// application space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    Application,
}

impl PacketNumberSpace {
    /// The space a given encryption level's packets are numbered in.
    pub fn for_level(level: EncryptionLevel) -> Self {
        match level {
            EncryptionLevel::Initial => PacketNumberSpace::Initial,
            EncryptionLevel::Handshake => PacketNumberSpace::Handshake,
            EncryptionLevel::ZeroRtt | EncryptionLevel::App => PacketNumberSpace::Application,
        }
    }
}
