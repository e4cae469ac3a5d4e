//! Transport parameter codec and sanity checks (RFC 9000 Section 18).
//!
//! Parameters travel inside the TLS handshake as a sequence of
//! (id, length, value) entries. Connection-level validation of the peer's
//! identifiers (original destination, retry source) lives with the
//! connection state machine; [`TransportParameters::validate`] covers the
//! value-range rules of Section 18.2.

use crate::error::{Error, Result, TransportError};
use crate::types::{read_varint, write_varint, ConnectionId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const PARAM_ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
const PARAM_MAX_IDLE_TIMEOUT: u64 = 0x01;
const PARAM_STATELESS_RESET_TOKEN: u64 = 0x02;
const PARAM_MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const PARAM_INITIAL_MAX_DATA: u64 = 0x04;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const PARAM_INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const PARAM_INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const PARAM_INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const PARAM_ACK_DELAY_EXPONENT: u64 = 0x0a;
const PARAM_MAX_ACK_DELAY: u64 = 0x0b;
const PARAM_DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const PARAM_ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
const PARAM_INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
const PARAM_RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;

/// The transport parameters exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    /// Idle timeout in milliseconds; 0 disables the timeout.
    pub max_idle_timeout: u64,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    /// Milliseconds.
    pub max_ack_delay: u64,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: 0,
            stateless_reset_token: None,
            max_udp_payload_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            disable_active_migration: false,
            active_connection_id_limit: 2,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
        }
    }
}

impl TransportParameters {
    /// Serialize onto `buf`; parameters still at their protocol default are
    /// elided.
    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(cid) = &self.original_destination_connection_id {
            write_bytes_param(buf, PARAM_ORIGINAL_DESTINATION_CONNECTION_ID, cid.as_bytes());
        }
        write_numeric_param(buf, PARAM_MAX_IDLE_TIMEOUT, self.max_idle_timeout, 0);
        if let Some(token) = &self.stateless_reset_token {
            write_bytes_param(buf, PARAM_STATELESS_RESET_TOKEN, token);
        }
        write_numeric_param(buf, PARAM_MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size, 65527);
        write_numeric_param(buf, PARAM_INITIAL_MAX_DATA, self.initial_max_data, 0);
        write_numeric_param(
            buf,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
            0,
        );
        write_numeric_param(
            buf,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
            0,
        );
        write_numeric_param(
            buf,
            PARAM_INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
            0,
        );
        write_numeric_param(buf, PARAM_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi, 0);
        write_numeric_param(buf, PARAM_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni, 0);
        write_numeric_param(buf, PARAM_ACK_DELAY_EXPONENT, self.ack_delay_exponent, 3);
        write_numeric_param(buf, PARAM_MAX_ACK_DELAY, self.max_ack_delay, 25);
        if self.disable_active_migration {
            write_bytes_param(buf, PARAM_DISABLE_ACTIVE_MIGRATION, &[]);
        }
        write_numeric_param(
            buf,
            PARAM_ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
            2,
        );
        if let Some(cid) = &self.initial_source_connection_id {
            write_bytes_param(buf, PARAM_INITIAL_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
        if let Some(cid) = &self.retry_source_connection_id {
            write_bytes_param(buf, PARAM_RETRY_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
    }

    /// Parse a full parameter block; unknown ids are skipped
    /// (RFC 9000 Section 7.4.2).
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let mut params = Self::default();

        while buf.has_remaining() {
            let id = read_varint(&mut buf)?;
            let len = read_varint(&mut buf)? as usize;
            if buf.remaining() < len {
                return Err(Error::Transport(TransportError::TransportParameterError));
            }
            let mut value = buf.copy_to_bytes(len);

            match id {
                PARAM_ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(read_cid(value)?);
                }
                PARAM_MAX_IDLE_TIMEOUT => params.max_idle_timeout = read_varint(&mut value)?,
                PARAM_STATELESS_RESET_TOKEN => {
                    if value.len() != 16 {
                        return Err(Error::Transport(TransportError::TransportParameterError));
                    }
                    let mut token = [0u8; 16];
                    value.copy_to_slice(&mut token);
                    params.stateless_reset_token = Some(token);
                }
                PARAM_MAX_UDP_PAYLOAD_SIZE => {
                    params.max_udp_payload_size = read_varint(&mut value)?
                }
                PARAM_INITIAL_MAX_DATA => params.initial_max_data = read_varint(&mut value)?,
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = read_varint(&mut value)?
                }
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = read_varint(&mut value)?
                }
                PARAM_INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = read_varint(&mut value)?
                }
                PARAM_INITIAL_MAX_STREAMS_BIDI => {
                    params.initial_max_streams_bidi = read_varint(&mut value)?
                }
                PARAM_INITIAL_MAX_STREAMS_UNI => {
                    params.initial_max_streams_uni = read_varint(&mut value)?
                }
                PARAM_ACK_DELAY_EXPONENT => {
                    params.ack_delay_exponent = read_varint(&mut value)?
                }
                PARAM_MAX_ACK_DELAY => params.max_ack_delay = read_varint(&mut value)?,
                PARAM_DISABLE_ACTIVE_MIGRATION => params.disable_active_migration = true,
                PARAM_ACTIVE_CONNECTION_ID_LIMIT => {
                    params.active_connection_id_limit = read_varint(&mut value)?
                }
                PARAM_INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id = Some(read_cid(value)?);
                }
                PARAM_RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id = Some(read_cid(value)?);
                }
                _ => {}
            }
        }

        Ok(params)
    }

    /// Value-range checks of RFC 9000 Section 18.2.
    pub fn validate(&self) -> Result<()> {
        if self.ack_delay_exponent > 20 {
            return Err(Error::Transport(TransportError::TransportParameterError));
        }
        if self.max_ack_delay >= 1 << 14 {
            return Err(Error::Transport(TransportError::TransportParameterError));
        }
        if self.active_connection_id_limit < 2 {
            return Err(Error::Transport(TransportError::TransportParameterError));
        }
        if self.max_udp_payload_size < 1200 {
            return Err(Error::Transport(TransportError::TransportParameterError));
        }
        Ok(())
    }
}

fn write_bytes_param(buf: &mut BytesMut, id: u64, value: &[u8]) {
    write_varint(buf, id);
    write_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

fn write_numeric_param(buf: &mut BytesMut, id: u64, value: u64, default: u64) {
    if value == default {
        return;
    }
    write_varint(buf, id);
    write_varint(buf, crate::types::varint_size(value) as u64);
    write_varint(buf, value);
}

fn read_cid(value: Bytes) -> Result<ConnectionId> {
    ConnectionId::new(value).map_err(|_| Error::Transport(TransportError::TransportParameterError))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let params = TransportParameters {
            original_destination_connection_id: Some(
                ConnectionId::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
            ),
            max_idle_timeout: 30_000,
            stateless_reset_token: Some([0x5a; 16]),
            initial_max_data: 1_048_576,
            initial_max_stream_data_bidi_local: 65_536,
            initial_max_stream_data_bidi_remote: 65_536,
            initial_max_stream_data_uni: 32_768,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 3,
            ack_delay_exponent: 8,
            max_ack_delay: 40,
            disable_active_migration: true,
            active_connection_id_limit: 8,
            initial_source_connection_id: Some(ConnectionId::from_slice(&[9, 9]).unwrap()),
            retry_source_connection_id: None,
            ..TransportParameters::default()
        };

        let mut buf = BytesMut::new();
        params.encode(&mut buf);
        let decoded = TransportParameters::decode(buf.freeze()).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn defaults_are_elided_on_the_wire() {
        let mut buf = BytesMut::new();
        TransportParameters::default().encode(&mut buf);
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_parameters_are_skipped() {
        let mut buf = BytesMut::new();
        // Unknown id 0x20 with 2 value bytes, then initial_max_data = 5.
        write_varint(&mut buf, 0x20);
        write_varint(&mut buf, 2);
        buf.put_slice(&[0xde, 0xad]);
        write_varint(&mut buf, 0x04);
        write_varint(&mut buf, 1);
        write_varint(&mut buf, 5);

        let params = TransportParameters::decode(buf.freeze()).unwrap();
        assert_eq!(params.initial_max_data, 5);
    }

    #[test]
    fn truncated_value_is_a_parameter_error() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 0x04);
        write_varint(&mut buf, 4);
        buf.put_slice(&[0x80]); // claims 4 bytes, carries 1

        assert!(TransportParameters::decode(buf.freeze()).is_err());
    }

    #[test]
    fn range_rules_of_section_18_2() {
        let ok = TransportParameters::default();
        assert!(ok.validate().is_ok());

        let bad = TransportParameters { ack_delay_exponent: 21, ..TransportParameters::default() };
        assert!(bad.validate().is_err());

        let bad = TransportParameters { max_ack_delay: 1 << 14, ..TransportParameters::default() };
        assert!(bad.validate().is_err());

        let bad =
            TransportParameters { active_connection_id_limit: 1, ..TransportParameters::default() };
        assert!(bad.validate().is_err());

        let bad =
            TransportParameters { max_udp_payload_size: 1199, ..TransportParameters::default() };
        assert!(bad.validate().is_err());
    }
}
