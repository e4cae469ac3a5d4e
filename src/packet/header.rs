//! Packet header invariants and long-header parsing (RFC 8999 Section 5,
//! RFC 9000 Section 17).

use crate::error::{Error, Result};
use crate::types::{ConnectionId, MAX_CID_LENGTH};
use bytes::{Buf, Bytes};

/// Packet types distinguishable from the header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    VersionNegotiation,
    /// Short-header 1-RTT packet.
    OneRtt,
}

/// Header form bit: 1 = long header, 0 = short header (RFC 8999 Section 5.1).
pub fn is_long_header(first_byte: u8) -> bool {
    first_byte & 0x80 == 0x80
}

/// Fixed bit, set in every packet except Version Negotiation
/// (RFC 9000 Section 17.2).
pub fn has_fixed_bit(first_byte: u8) -> bool {
    first_byte & 0x40 == 0x40
}

/// Long-header packet type from bits 5-4 of the first byte.
pub fn long_packet_type(first_byte: u8) -> PacketType {
    match (first_byte & 0x30) >> 4 {
        0b00 => PacketType::Initial,
        0b01 => PacketType::ZeroRtt,
        0b10 => PacketType::Handshake,
        _ => PacketType::Retry,
    }
}

/// Fields common to every long header: version and both connection IDs.
#[derive(Debug, Clone)]
pub struct LongHeader {
    pub first_byte: u8,
    pub version: u32,
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
}

/// Parse the invariant long-header prefix, consuming it from `buf`.
///
/// Fails with [`Error::InvalidPacket`] when the buffer runs out before the
/// header is complete or a connection ID is over-long.
pub fn parse_long_header(buf: &mut Bytes) -> Result<LongHeader> {
    if buf.remaining() < 5 {
        return Err(Error::InvalidPacket);
    }
    let first_byte = buf.get_u8();
    let version = buf.get_u32();

    let destination_cid = read_cid(buf)?;
    let source_cid = read_cid(buf)?;

    Ok(LongHeader { first_byte, version, destination_cid, source_cid })
}

fn read_cid(buf: &mut Bytes) -> Result<ConnectionId> {
    if !buf.has_remaining() {
        return Err(Error::InvalidPacket);
    }
    let len = buf.get_u8() as usize;
    if len > MAX_CID_LENGTH || buf.remaining() < len {
        return Err(Error::InvalidPacket);
    }
    ConnectionId::new(buf.copy_to_bytes(len)).map_err(|_| Error::InvalidPacket)
}
