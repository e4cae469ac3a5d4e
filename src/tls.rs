//! TLS engine interface (RFC 9001).
//!
//! The engine produces and consumes CRYPTO-frame payloads, signals
//! handshake completion and hands over the peer's transport parameter
//! extension. Key material never crosses this boundary in the clear; traffic
//! keys materialize behind the
//! [`PacketProtection`](crate::packet::PacketProtection) hook.

use crate::error::Result;
use crate::types::EncryptionLevel;
use bytes::Bytes;

/// A chunk of handshake bytes to carry in a CRYPTO frame at some level.
#[derive(Debug, Clone)]
pub struct HandshakeBytes {
    pub level: EncryptionLevel,
    pub data: Bytes,
}

/// Client-side TLS engine consumed by the connection.
pub trait TlsEngine: Send {
    /// Begin the handshake: produce the ClientHello for `server_name`
    /// offering `alpn`.
    fn start_handshake(&mut self, server_name: &str, alpn: &str) -> Result<Bytes>;

    /// Feed handshake bytes received at `level`; returns whatever flights
    /// the engine wants sent in response.
    fn consume_handshake_data(
        &mut self,
        level: EncryptionLevel,
        data: &[u8],
    ) -> Result<Vec<HandshakeBytes>>;

    /// Whether the handshake has completed.
    fn is_handshake_complete(&self) -> bool;

    /// The peer's raw transport parameter extension, once received.
    fn peer_transport_parameters(&self) -> Option<Bytes>;
}

/// Inert TLS engine: emits an empty ClientHello and never completes.
///
/// Stands in where no real TLS stack is wired up, chiefly in tests driving
/// the connection state machine directly.
#[derive(Debug, Default)]
pub struct NullTlsEngine {
    started: bool,
}

impl TlsEngine for NullTlsEngine {
    fn start_handshake(&mut self, _server_name: &str, _alpn: &str) -> Result<Bytes> {
        self.started = true;
        Ok(Bytes::new())
    }

    fn consume_handshake_data(
        &mut self,
        _level: EncryptionLevel,
        _data: &[u8],
    ) -> Result<Vec<HandshakeBytes>> {
        Ok(Vec::new())
    }

    fn is_handshake_complete(&self) -> bool {
        false
    }

    fn peer_transport_parameters(&self) -> Option<Bytes> {
        None
    }
}
