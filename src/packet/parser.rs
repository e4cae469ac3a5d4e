//! Datagram parsing and packet demultiplexing (RFC 9000 Sections 12.2, 17).
//!
//! A UDP datagram carries one or more coalesced packets. The parser walks
//! the buffer, classifies each packet by its header and hands back typed
//! packet values; payload decryption happens later through the
//! [`PacketProtection`](super::protection::PacketProtection) hook.
//!
//! This is the client-side parser: 0-RTT packets are never acceptable and
//! parse as invalid.

use super::header::{self, PacketType};
use super::retry::{retry_integrity_tag, RETRY_INTEGRITY_TAG_LENGTH};
use crate::error::{Error, Result};
use crate::frames::Frame;
use crate::types::{read_varint, ConnectionId, EncryptionLevel, PacketNumber};
use crate::version::Version;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Version Negotiation packet (RFC 9000 Section 17.2.1).
#[derive(Debug, Clone)]
pub struct VersionNegotiationPacket {
    pub destination_cid: ConnectionId,
    pub source_cid: ConnectionId,
    /// Versions the server is willing to speak, in server order.
    pub supported_versions: Vec<u32>,
}

/// Retry packet (RFC 9000 Section 17.2.5).
#[derive(Debug, Clone)]
pub struct RetryPacket {
    pub version: Version,
    pub source_cid: ConnectionId,
    pub destination_cid: ConnectionId,
    pub retry_token: Bytes,
    pub integrity_tag: [u8; RETRY_INTEGRITY_TAG_LENGTH],
    /// The packet exactly as serialized, minus the trailing tag; the tag is
    /// recomputed over these bytes during verification.
    raw_sans_tag: Bytes,
}

impl RetryPacket {
    /// Build a retry packet whose integrity tag is valid for
    /// `original_destination_cid`.
    pub fn new(
        version: Version,
        source_cid: ConnectionId,
        destination_cid: ConnectionId,
        original_destination_cid: &ConnectionId,
        retry_token: &[u8],
    ) -> Self {
        let mut raw = BytesMut::new();
        raw.put_u8(0xf0);
        raw.put_u32(version.0);
        raw.put_u8(destination_cid.len() as u8);
        raw.put_slice(destination_cid.as_bytes());
        raw.put_u8(source_cid.len() as u8);
        raw.put_slice(source_cid.as_bytes());
        raw.put_slice(retry_token);
        let raw_sans_tag = raw.freeze();

        let integrity_tag =
            retry_integrity_tag(version, original_destination_cid, &raw_sans_tag);
        Self {
            version,
            source_cid,
            destination_cid,
            retry_token: Bytes::copy_from_slice(retry_token),
            integrity_tag,
            raw_sans_tag,
        }
    }

    /// Verify the carried tag against the original destination connection ID
    /// this client sent its first Initial to.
    pub fn verify_integrity(&self, original_destination_cid: &ConnectionId) -> bool {
        let expected =
            retry_integrity_tag(self.version, original_destination_cid, &self.raw_sans_tag);
        expected == self.integrity_tag
    }

    /// Corrupt the carried tag. Test aid for exercising the discard path.
    #[cfg(test)]
    pub(crate) fn with_integrity_tag(mut self, tag: [u8; RETRY_INTEGRITY_TAG_LENGTH]) -> Self {
        self.integrity_tag = tag;
        self
    }
}

/// A packet whose payload is still under packet protection.
#[derive(Debug, Clone)]
pub struct ProtectedPacket {
    pub level: EncryptionLevel,
    pub version: Option<Version>,
    pub destination_cid: ConnectionId,
    pub source_cid: Option<ConnectionId>,
    /// Address-validation token, Initial packets only.
    pub token: Option<Bytes>,
    pub first_byte: u8,
    /// Protected packet number and payload bytes.
    pub payload: Bytes,
}

/// A fully decrypted packet: what the frame handlers consume.
///
/// Produced by a [`PacketProtection`](super::protection::PacketProtection)
/// implementation, or constructed directly in tests.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub level: EncryptionLevel,
    pub destination_cid: ConnectionId,
    pub packet_number: PacketNumber,
    pub frames: Vec<Frame>,
}

impl FramePacket {
    /// A 1-RTT short-header packet carrying the given frames.
    pub fn short(destination_cid: ConnectionId, frames: Vec<Frame>) -> Self {
        Self { level: EncryptionLevel::App, destination_cid, packet_number: 0, frames }
    }
}

/// One parsed packet out of a datagram.
#[derive(Debug, Clone)]
pub enum ParsedPacket {
    VersionNegotiation(VersionNegotiationPacket),
    Retry(RetryPacket),
    Protected(ProtectedPacket),
}

/// Stateless packet parser, configured with the length of the connection
/// IDs this endpoint issues (short headers carry no length field).
#[derive(Debug, Clone)]
pub struct PacketParser {
    own_cid_length: usize,
}

impl PacketParser {
    pub fn new(own_cid_length: usize) -> Self {
        Self { own_cid_length }
    }

    /// Parse every coalesced packet in `datagram`.
    ///
    /// Packets with unknown versions surface as [`Error::UnknownVersion`];
    /// anything structurally broken as [`Error::InvalidPacket`]. Either way
    /// the caller discards without touching connection state.
    pub fn parse_datagram(&self, mut datagram: Bytes) -> Result<Vec<ParsedPacket>> {
        let mut packets = Vec::new();
        while datagram.has_remaining() {
            packets.push(self.parse_packet(&mut datagram)?);
        }
        Ok(packets)
    }

    /// Parse a single packet from the front of `buf`, leaving any coalesced
    /// remainder in place.
    pub fn parse_packet(&self, buf: &mut Bytes) -> Result<ParsedPacket> {
        if !buf.has_remaining() {
            return Err(Error::InvalidPacket);
        }
        let first_byte = buf.chunk()[0];
        if header::is_long_header(first_byte) {
            self.parse_long(buf)
        } else {
            self.parse_short(buf)
        }
    }

    fn parse_long(&self, buf: &mut Bytes) -> Result<ParsedPacket> {
        let long = header::parse_long_header(buf)?;

        if long.version == Version::NEGOTIATION.0 {
            return parse_version_negotiation(long, buf);
        }

        let version = Version::parse(long.version)?;

        match header::long_packet_type(long.first_byte) {
            PacketType::Initial => {
                let token_len = read_varint(buf)? as usize;
                let token = take(buf, token_len)?;
                let payload = read_length_bounded(buf)?;
                Ok(ParsedPacket::Protected(ProtectedPacket {
                    level: EncryptionLevel::Initial,
                    version: Some(version),
                    destination_cid: long.destination_cid,
                    source_cid: Some(long.source_cid),
                    token: Some(token),
                    first_byte: long.first_byte,
                    payload,
                }))
            }

            PacketType::Handshake => {
                let payload = read_length_bounded(buf)?;
                Ok(ParsedPacket::Protected(ProtectedPacket {
                    level: EncryptionLevel::Handshake,
                    version: Some(version),
                    destination_cid: long.destination_cid,
                    source_cid: Some(long.source_cid),
                    token: None,
                    first_byte: long.first_byte,
                    payload,
                }))
            }

            // A client never accepts 0-RTT packets.
            PacketType::ZeroRtt => Err(Error::InvalidPacket),

            PacketType::Retry => {
                // Token runs to the final 16 tag bytes; a retry packet is
                // never coalesced with others.
                if buf.remaining() < RETRY_INTEGRITY_TAG_LENGTH {
                    return Err(Error::InvalidPacket);
                }
                let token_len = buf.remaining() - RETRY_INTEGRITY_TAG_LENGTH;
                let retry_token = take(buf, token_len)?;
                let mut integrity_tag = [0u8; RETRY_INTEGRITY_TAG_LENGTH];
                buf.copy_to_slice(&mut integrity_tag);

                let mut raw = BytesMut::new();
                raw.put_u8(long.first_byte);
                raw.put_u32(long.version);
                raw.put_u8(long.destination_cid.len() as u8);
                raw.put_slice(long.destination_cid.as_bytes());
                raw.put_u8(long.source_cid.len() as u8);
                raw.put_slice(long.source_cid.as_bytes());
                raw.put_slice(&retry_token);

                Ok(ParsedPacket::Retry(RetryPacket {
                    version,
                    source_cid: long.source_cid,
                    destination_cid: long.destination_cid,
                    retry_token,
                    integrity_tag,
                    raw_sans_tag: raw.freeze(),
                }))
            }

            PacketType::VersionNegotiation | PacketType::OneRtt => unreachable!(),
        }
    }

    fn parse_short(&self, buf: &mut Bytes) -> Result<ParsedPacket> {
        let first_byte = buf.get_u8();
        if buf.remaining() < self.own_cid_length {
            return Err(Error::InvalidPacket);
        }
        let destination_cid = ConnectionId::new(buf.copy_to_bytes(self.own_cid_length))
            .map_err(|_| Error::InvalidPacket)?;
        if !buf.has_remaining() {
            // At least a packet number byte must follow.
            return Err(Error::InvalidPacket);
        }
        // A short-header packet extends to the end of the datagram.
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(ParsedPacket::Protected(ProtectedPacket {
            level: EncryptionLevel::App,
            version: None,
            destination_cid,
            source_cid: None,
            token: None,
            first_byte,
            payload,
        }))
    }
}

fn parse_version_negotiation(
    long: header::LongHeader,
    buf: &mut Bytes,
) -> Result<ParsedPacket> {
    let mut supported_versions = Vec::new();
    while buf.remaining() >= 4 {
        supported_versions.push(buf.get_u32());
    }
    if buf.has_remaining() || supported_versions.is_empty() {
        return Err(Error::InvalidPacket);
    }
    Ok(ParsedPacket::VersionNegotiation(VersionNegotiationPacket {
        destination_cid: long.destination_cid,
        source_cid: long.source_cid,
        supported_versions,
    }))
}

fn take(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(Error::InvalidPacket);
    }
    Ok(buf.copy_to_bytes(len))
}

fn read_length_bounded(buf: &mut Bytes) -> Result<Bytes> {
    let length = read_varint(buf)? as usize;
    if length == 0 {
        return Err(Error::InvalidPacket);
    }
    take(buf, length)
}
