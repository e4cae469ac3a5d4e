//! Packet protection hooks (RFC 9001 Sections 5.3, 5.4).
//!
//! The engine is key-agnostic: header protection removal and payload AEAD
//! are performed behind this trait by whatever the TLS engine derived keys
//! for. [`PlaintextProtection`] is the loopback implementation used in tests
//! and offline tooling; it carries the packet number as a leading varint and
//! the frames in the clear.

use super::parser::{FramePacket, ProtectedPacket};
use crate::error::{Error, Result};
use crate::frames::Frame;
use crate::types::{read_varint, write_varint, PacketNumber};
use bytes::{Buf, BufMut, BytesMut};

/// Removes and applies packet protection for one connection.
pub trait PacketProtection: Send {
    /// Unprotect `packet`, yielding the decrypted frames.
    ///
    /// `largest_received` is the largest packet number already processed in
    /// the packet's number space, needed to expand the truncated packet
    /// number. Fails with [`Error::InvalidPacket`] when authentication
    /// fails; frame-level side effects must only happen after this
    /// succeeds.
    fn open(
        &self,
        packet: &ProtectedPacket,
        largest_received: Option<PacketNumber>,
    ) -> Result<FramePacket>;

    /// Protect `frames` as the payload of packet `packet_number`.
    fn seal(&self, packet_number: PacketNumber, frames: &[Frame]) -> Result<BytesMut>;
}

/// Identity protection: varint packet number followed by cleartext frames.
#[derive(Debug, Default, Clone)]
pub struct PlaintextProtection;

impl PacketProtection for PlaintextProtection {
    fn open(
        &self,
        packet: &ProtectedPacket,
        _largest_received: Option<PacketNumber>,
    ) -> Result<FramePacket> {
        let mut payload = packet.payload.clone();
        if !payload.has_remaining() {
            return Err(Error::InvalidPacket);
        }
        let packet_number = read_varint(&mut payload)?;
        let frames = Frame::parse_all(payload).map_err(|_| Error::InvalidPacket)?;
        Ok(FramePacket {
            level: packet.level,
            destination_cid: packet.destination_cid.clone(),
            packet_number,
            frames,
        })
    }

    fn seal(&self, packet_number: PacketNumber, frames: &[Frame]) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, packet_number);
        for frame in frames {
            frame.encode(&mut buf);
        }
        Ok(buf)
    }
}
