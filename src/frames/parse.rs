//! Frame parsing and serialization (RFC 9000 Section 12.4, 19).
//!
//! Parsing consumes a decrypted packet payload (`Bytes`); malformed input
//! surfaces as [`Error::FrameEncoding`] and discards the packet, it never
//! aborts the connection by panic.

use super::types::*;
use crate::error::{Error, Result};
use crate::types::{read_varint, write_varint, ConnectionId, StreamId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tinyvec::TinyVec;

impl Frame {
    /// Parse a single frame from the front of `buf`.
    pub fn parse(buf: &mut Bytes) -> Result<Frame> {
        if !buf.has_remaining() {
            return Err(Error::FrameEncoding);
        }
        let frame_type = read_varint(buf)?;

        match frame_type {
            FRAME_TYPE_PADDING => {
                // Consecutive PADDING bytes collapse into one frame.
                let mut length = 1;
                while buf.has_remaining() && buf.chunk()[0] == 0x00 {
                    buf.advance(1);
                    length += 1;
                }
                Ok(Frame::Padding { length })
            }

            FRAME_TYPE_PING => Ok(Frame::Ping),

            FRAME_TYPE_ACK | FRAME_TYPE_ACK_ECN => {
                parse_ack(buf, frame_type == FRAME_TYPE_ACK_ECN).map(Frame::Ack)
            }

            FRAME_TYPE_RESET_STREAM => {
                let stream_id = StreamId(read_varint(buf)?);
                let error_code = read_varint(buf)?;
                let final_size = read_varint(buf)?;
                Ok(Frame::ResetStream(ResetStreamFrame { stream_id, error_code, final_size }))
            }

            FRAME_TYPE_STOP_SENDING => {
                let stream_id = StreamId(read_varint(buf)?);
                let error_code = read_varint(buf)?;
                Ok(Frame::StopSending(StopSendingFrame { stream_id, error_code }))
            }

            FRAME_TYPE_CRYPTO => {
                let offset = read_varint(buf)?;
                let length = read_varint(buf)? as usize;
                let data = take_bytes(buf, length)?;
                Ok(Frame::Crypto(CryptoFrame { offset, data }))
            }

            FRAME_TYPE_NEW_TOKEN => {
                let length = read_varint(buf)? as usize;
                if length == 0 {
                    return Err(Error::FrameEncoding);
                }
                let token = take_bytes(buf, length)?;
                Ok(Frame::NewToken(NewTokenFrame { token }))
            }

            t if (FRAME_TYPE_STREAM_BASE..=FRAME_TYPE_STREAM_BASE + 0x07).contains(&t) => {
                parse_stream(buf, t).map(Frame::Stream)
            }

            FRAME_TYPE_MAX_DATA => {
                let maximum_data = read_varint(buf)?;
                Ok(Frame::MaxData(MaxDataFrame { maximum_data }))
            }

            FRAME_TYPE_MAX_STREAM_DATA => {
                let stream_id = StreamId(read_varint(buf)?);
                let maximum_stream_data = read_varint(buf)?;
                Ok(Frame::MaxStreamData(MaxStreamDataFrame { stream_id, maximum_stream_data }))
            }

            FRAME_TYPE_MAX_STREAMS_BIDI | FRAME_TYPE_MAX_STREAMS_UNI => {
                let maximum_streams = read_varint(buf)?;
                Ok(Frame::MaxStreams(MaxStreamsFrame {
                    maximum_streams,
                    bidirectional: frame_type == FRAME_TYPE_MAX_STREAMS_BIDI,
                }))
            }

            FRAME_TYPE_DATA_BLOCKED => {
                let data_limit = read_varint(buf)?;
                Ok(Frame::DataBlocked(DataBlockedFrame { data_limit }))
            }

            FRAME_TYPE_STREAM_DATA_BLOCKED => {
                let stream_id = StreamId(read_varint(buf)?);
                let stream_data_limit = read_varint(buf)?;
                Ok(Frame::StreamDataBlocked(StreamDataBlockedFrame { stream_id, stream_data_limit }))
            }

            FRAME_TYPE_STREAMS_BLOCKED_BIDI | FRAME_TYPE_STREAMS_BLOCKED_UNI => {
                let stream_limit = read_varint(buf)?;
                Ok(Frame::StreamsBlocked(StreamsBlockedFrame {
                    stream_limit,
                    bidirectional: frame_type == FRAME_TYPE_STREAMS_BLOCKED_BIDI,
                }))
            }

            FRAME_TYPE_NEW_CONNECTION_ID => {
                let sequence_number = read_varint(buf)?;
                let retire_prior_to = read_varint(buf)?;
                if !buf.has_remaining() {
                    return Err(Error::FrameEncoding);
                }
                let cid_len = buf.get_u8() as usize;
                if cid_len == 0 || cid_len > crate::types::MAX_CID_LENGTH {
                    return Err(Error::FrameEncoding);
                }
                let cid = take_bytes(buf, cid_len)?;
                let connection_id =
                    ConnectionId::new(cid).map_err(|_| Error::FrameEncoding)?;
                let mut stateless_reset_token = [0u8; 16];
                if buf.remaining() < 16 {
                    return Err(Error::FrameEncoding);
                }
                buf.copy_to_slice(&mut stateless_reset_token);
                Ok(Frame::NewConnectionId(NewConnectionIdFrame {
                    sequence_number,
                    retire_prior_to,
                    connection_id,
                    stateless_reset_token,
                }))
            }

            FRAME_TYPE_RETIRE_CONNECTION_ID => {
                let sequence_number = read_varint(buf)?;
                Ok(Frame::RetireConnectionId(RetireConnectionIdFrame { sequence_number }))
            }

            FRAME_TYPE_PATH_CHALLENGE => {
                let mut data = [0u8; 8];
                if buf.remaining() < 8 {
                    return Err(Error::FrameEncoding);
                }
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathChallenge(PathChallengeFrame { data }))
            }

            FRAME_TYPE_PATH_RESPONSE => {
                let mut data = [0u8; 8];
                if buf.remaining() < 8 {
                    return Err(Error::FrameEncoding);
                }
                buf.copy_to_slice(&mut data);
                Ok(Frame::PathResponse(PathResponseFrame { data }))
            }

            FRAME_TYPE_CONNECTION_CLOSE_TRANSPORT | FRAME_TYPE_CONNECTION_CLOSE_APP => {
                let application = frame_type == FRAME_TYPE_CONNECTION_CLOSE_APP;
                let error_code = read_varint(buf)?;
                let trigger_frame_type =
                    if application { None } else { Some(read_varint(buf)?) };
                let reason_len = read_varint(buf)? as usize;
                let reason = take_bytes(buf, reason_len)?;
                Ok(Frame::ConnectionClose(ConnectionCloseFrame {
                    error_code,
                    frame_type: trigger_frame_type,
                    reason,
                    application,
                }))
            }

            FRAME_TYPE_HANDSHAKE_DONE => Ok(Frame::HandshakeDone),

            _ => Err(Error::FrameEncoding),
        }
    }

    /// Parse every frame in a decrypted packet payload.
    pub fn parse_all(mut payload: Bytes) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while payload.has_remaining() {
            frames.push(Frame::parse(&mut payload)?);
        }
        Ok(frames)
    }

    /// Serialize this frame onto `buf` in wire format.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Frame::Padding { length } => {
                for _ in 0..*length {
                    buf.put_u8(0x00);
                }
            }

            Frame::Ping => write_varint(buf, FRAME_TYPE_PING),

            Frame::Ack(ack) => encode_ack(ack, buf),

            Frame::ResetStream(f) => {
                write_varint(buf, FRAME_TYPE_RESET_STREAM);
                write_varint(buf, f.stream_id.0);
                write_varint(buf, f.error_code);
                write_varint(buf, f.final_size);
            }

            Frame::StopSending(f) => {
                write_varint(buf, FRAME_TYPE_STOP_SENDING);
                write_varint(buf, f.stream_id.0);
                write_varint(buf, f.error_code);
            }

            Frame::Crypto(f) => {
                write_varint(buf, FRAME_TYPE_CRYPTO);
                write_varint(buf, f.offset);
                write_varint(buf, f.data.len() as u64);
                buf.put_slice(&f.data);
            }

            Frame::NewToken(f) => {
                write_varint(buf, FRAME_TYPE_NEW_TOKEN);
                write_varint(buf, f.token.len() as u64);
                buf.put_slice(&f.token);
            }

            Frame::Stream(f) => {
                // Offset and length fields are always explicit on the wire.
                let mut ty = FRAME_TYPE_STREAM_BASE | STREAM_FRAME_BIT_LEN | STREAM_FRAME_BIT_OFF;
                if f.fin {
                    ty |= STREAM_FRAME_BIT_FIN;
                }
                write_varint(buf, ty);
                write_varint(buf, f.stream_id.0);
                write_varint(buf, f.offset);
                write_varint(buf, f.data.len() as u64);
                buf.put_slice(&f.data);
            }

            Frame::MaxData(f) => {
                write_varint(buf, FRAME_TYPE_MAX_DATA);
                write_varint(buf, f.maximum_data);
            }

            Frame::MaxStreamData(f) => {
                write_varint(buf, FRAME_TYPE_MAX_STREAM_DATA);
                write_varint(buf, f.stream_id.0);
                write_varint(buf, f.maximum_stream_data);
            }

            Frame::MaxStreams(f) => {
                let ty = if f.bidirectional {
                    FRAME_TYPE_MAX_STREAMS_BIDI
                } else {
                    FRAME_TYPE_MAX_STREAMS_UNI
                };
                write_varint(buf, ty);
                write_varint(buf, f.maximum_streams);
            }

            Frame::DataBlocked(f) => {
                write_varint(buf, FRAME_TYPE_DATA_BLOCKED);
                write_varint(buf, f.data_limit);
            }

            Frame::StreamDataBlocked(f) => {
                write_varint(buf, FRAME_TYPE_STREAM_DATA_BLOCKED);
                write_varint(buf, f.stream_id.0);
                write_varint(buf, f.stream_data_limit);
            }

            Frame::StreamsBlocked(f) => {
                let ty = if f.bidirectional {
                    FRAME_TYPE_STREAMS_BLOCKED_BIDI
                } else {
                    FRAME_TYPE_STREAMS_BLOCKED_UNI
                };
                write_varint(buf, ty);
                write_varint(buf, f.stream_limit);
            }

            Frame::NewConnectionId(f) => {
                write_varint(buf, FRAME_TYPE_NEW_CONNECTION_ID);
                write_varint(buf, f.sequence_number);
                write_varint(buf, f.retire_prior_to);
                buf.put_u8(f.connection_id.len() as u8);
                buf.put_slice(f.connection_id.as_bytes());
                buf.put_slice(&f.stateless_reset_token);
            }

            Frame::RetireConnectionId(f) => {
                write_varint(buf, FRAME_TYPE_RETIRE_CONNECTION_ID);
                write_varint(buf, f.sequence_number);
            }

            Frame::PathChallenge(f) => {
                write_varint(buf, FRAME_TYPE_PATH_CHALLENGE);
                buf.put_slice(&f.data);
            }

            Frame::PathResponse(f) => {
                write_varint(buf, FRAME_TYPE_PATH_RESPONSE);
                buf.put_slice(&f.data);
            }

            Frame::ConnectionClose(f) => {
                if f.application {
                    write_varint(buf, FRAME_TYPE_CONNECTION_CLOSE_APP);
                    write_varint(buf, f.error_code);
                } else {
                    write_varint(buf, FRAME_TYPE_CONNECTION_CLOSE_TRANSPORT);
                    write_varint(buf, f.error_code);
                    write_varint(buf, f.frame_type.unwrap_or(0));
                }
                write_varint(buf, f.reason.len() as u64);
                buf.put_slice(&f.reason);
            }

            Frame::HandshakeDone => write_varint(buf, FRAME_TYPE_HANDSHAKE_DONE),
        }
    }

    /// Wire size of this frame once encoded.
    pub fn encoded_size(&self) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.len()
    }
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(Error::FrameEncoding);
    }
    Ok(buf.copy_to_bytes(len))
}

fn parse_stream(buf: &mut Bytes, frame_type: u64) -> Result<StreamFrame> {
    let fin = frame_type & STREAM_FRAME_BIT_FIN != 0;
    let stream_id = StreamId(read_varint(buf)?);
    let offset = if frame_type & STREAM_FRAME_BIT_OFF != 0 { read_varint(buf)? } else { 0 };
    let data = if frame_type & STREAM_FRAME_BIT_LEN != 0 {
        let length = read_varint(buf)? as usize;
        take_bytes(buf, length)?
    } else {
        // Without a length field the data runs to the end of the packet.
        buf.copy_to_bytes(buf.remaining())
    };
    Ok(StreamFrame { stream_id, offset, data, fin })
}

fn parse_ack(buf: &mut Bytes, ecn: bool) -> Result<AckFrame> {
    let largest_acknowledged = read_varint(buf)?;
    let ack_delay = read_varint(buf)?;
    let range_count = read_varint(buf)?;
    let first_range = read_varint(buf)?;

    if first_range > largest_acknowledged {
        return Err(Error::FrameEncoding);
    }

    let mut ranges: TinyVec<[AckRange; 8]> = TinyVec::default();
    let mut smallest = largest_acknowledged - first_range;
    ranges.push(AckRange { smallest, largest: largest_acknowledged });

    for _ in 0..range_count {
        let gap = read_varint(buf)?;
        let length = read_varint(buf)?;
        // The next range ends `gap + 2` below the previous smallest.
        let largest = smallest
            .checked_sub(gap + 2)
            .ok_or(Error::FrameEncoding)?;
        smallest = largest.checked_sub(length).ok_or(Error::FrameEncoding)?;
        ranges.push(AckRange { smallest, largest });
    }

    let ecn_counts = if ecn {
        Some(EcnCounts {
            ect0: read_varint(buf)?,
            ect1: read_varint(buf)?,
            ce: read_varint(buf)?,
        })
    } else {
        None
    };

    Ok(AckFrame { largest_acknowledged, ack_delay, ranges, ecn_counts })
}

fn encode_ack<B: BufMut>(ack: &AckFrame, buf: &mut B) {
    let ty = if ack.ecn_counts.is_some() { FRAME_TYPE_ACK_ECN } else { FRAME_TYPE_ACK };
    write_varint(buf, ty);
    write_varint(buf, ack.largest_acknowledged);
    write_varint(buf, ack.ack_delay);

    let first = ack.ranges.first().copied().unwrap_or(AckRange {
        smallest: ack.largest_acknowledged,
        largest: ack.largest_acknowledged,
    });
    write_varint(buf, ack.ranges.len().saturating_sub(1) as u64);
    write_varint(buf, first.largest - first.smallest);

    let mut previous_smallest = first.smallest;
    for range in ack.ranges.iter().skip(1) {
        let gap = previous_smallest - range.largest - 2;
        write_varint(buf, gap);
        write_varint(buf, range.largest - range.smallest);
        previous_smallest = range.smallest;
    }

    if let Some(ecn) = &ack.ecn_counts {
        write_varint(buf, ecn.ect0);
        write_varint(buf, ecn.ect1);
        write_varint(buf, ecn.ce);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut bytes = buf.freeze();
        let parsed = Frame::parse(&mut bytes).unwrap();
        assert!(!bytes.has_remaining(), "trailing bytes after parse");
        parsed
    }

    #[test]
    fn ack_single_packet() {
        let ack = AckFrame::new(7);
        assert_eq!(ack.acked_packet_numbers().collect::<Vec<_>>(), vec![7]);
        assert_eq!(round_trip(Frame::Ack(ack.clone())), Frame::Ack(ack));
    }

    #[test]
    fn ack_collapses_adjacent_packet_numbers() {
        let ack = AckFrame::from_packet_numbers(&[2, 3, 4, 8, 9, 12]);
        assert_eq!(ack.largest_acknowledged, 12);
        assert_eq!(ack.ranges.len(), 3);
        assert_eq!(
            ack.acked_packet_numbers().collect::<Vec<_>>(),
            vec![12, 8, 9, 2, 3, 4]
        );
        assert!(ack.acknowledges(9));
        assert!(!ack.acknowledges(5));
        assert_eq!(round_trip(Frame::Ack(ack.clone())), Frame::Ack(ack));
    }

    #[test]
    fn ack_gap_encoding_matches_rfc_layout() {
        // Largest 10, first range covers 9..=10, second range 3..=5:
        // gap = 9 - 5 - 2 = 2.
        let ack = AckFrame::from_packet_numbers(&[3, 4, 5, 9, 10]);
        let mut buf = BytesMut::new();
        Frame::Ack(ack).encode(&mut buf);
        assert_eq!(&buf[..], &[0x02, 0x0a, 0x00, 0x01, 0x01, 0x02, 0x02]);
    }

    #[test]
    fn padding_run_parses_as_one_frame() {
        let mut payload = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(Frame::parse(&mut payload).unwrap(), Frame::Padding { length: 3 });
        assert_eq!(Frame::parse(&mut payload).unwrap(), Frame::Ping);
    }

    #[test]
    fn new_connection_id_round_trips() {
        let frame = Frame::NewConnectionId(NewConnectionIdFrame {
            sequence_number: 3,
            retire_prior_to: 1,
            connection_id: ConnectionId::from_slice(&[0x0c, 0x0f, 0x0d, 0x0e]).unwrap(),
            stateless_reset_token: [0xab; 16],
        });
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn connection_close_variants_round_trip() {
        let transport = Frame::ConnectionClose(ConnectionCloseFrame::transport(0x08));
        assert_eq!(round_trip(transport.clone()), transport);

        let app = Frame::ConnectionClose(ConnectionCloseFrame {
            error_code: 0x17,
            frame_type: None,
            reason: Bytes::from_static(b"bye"),
            application: true,
        });
        assert_eq!(round_trip(app.clone()), app);
    }

    #[test]
    fn stream_frame_round_trips() {
        let frame = Frame::Stream(StreamFrame {
            stream_id: StreamId(4),
            offset: 1200,
            data: Bytes::from_static(b"hello quic"),
            fin: true,
        });
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn crypto_frame_rejects_truncated_data() {
        // CRYPTO frame claiming 16 bytes of data but carrying 2.
        let mut payload = Bytes::from_static(&[0x06, 0x00, 0x10, 0xde, 0xad]);
        assert_eq!(Frame::parse(&mut payload), Err(Error::FrameEncoding));
    }

    #[test]
    fn unknown_frame_type_is_an_encoding_error() {
        let mut payload = Bytes::from_static(&[0x21]);
        assert_eq!(Frame::parse(&mut payload), Err(Error::FrameEncoding));
    }

    #[test]
    fn ack_eliciting_classification() {
        assert!(Frame::Ping.is_ack_eliciting());
        assert!(Frame::HandshakeDone.is_ack_eliciting());
        assert!(!Frame::Padding { length: 4 }.is_ack_eliciting());
        assert!(!Frame::Ack(AckFrame::new(0)).is_ack_eliciting());
        assert!(!Frame::ConnectionClose(ConnectionCloseFrame::no_error()).is_ack_eliciting());
    }
}
