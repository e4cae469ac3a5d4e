//! Connection state machine tests (RFC 9000 Sections 5, 6, 7.3, 17.2.5).
//!
//! Collaborators are injected through the builder: a recording sender
//! captures every frame the connection emits, and packets are handed to
//! the connection in decrypted form.

#![cfg(test)]

use super::client::{ConnectionStatus, QuicClientConnection};
use crate::error::{Error, TransportError};
use crate::frames::{
    AckFrame, ConnectionCloseFrame, Frame, MaxDataFrame, MaxStreamDataFrame,
    RetireConnectionIdFrame,
};
use crate::packet::{FramePacket, ParsedPacket, RetryPacket};
use crate::recovery::SentPacket;
use crate::send::RecordingSender;
use crate::transport::TransportParameters;
use crate::types::{ConnectionId, EncryptionLevel, PacketNumber, StreamId};
use crate::version::Version;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Fixture {
    connection: QuicClientConnection,
    sender: Arc<RecordingSender>,
}

/// A connection that has dispatched its first Initial, with a fixed
/// original destination CID so retry integrity tags are deterministic.
fn connecting_fixture() -> Fixture {
    let sender = RecordingSender::new();
    let mut connection = QuicClientConnection::builder()
        .connection_id_length(4)
        .uri("//localhost:443")
        .sender(sender.clone())
        .build()
        .unwrap();
    connection
        .connect(Duration::from_secs(1), "hq-interop", Instant::now())
        .unwrap();
    connection
        .connection_ids_mut()
        .set_original_destination_cid(original_destination_cid());
    sender.clear();
    Fixture { connection, sender }
}

fn original_destination_cid() -> ConnectionId {
    ConnectionId::from_slice(&[0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]).unwrap()
}

fn retry_packet(odcid: &ConnectionId) -> RetryPacket {
    RetryPacket::new(
        Version::default_version(),
        ConnectionId::from_slice(&[0x0b, 0x0b, 0x0b, 0x0b]).unwrap(),
        ConnectionId::from_slice(&[0x0f, 0x0f, 0x0f, 0x0f]).unwrap(),
        odcid,
        &[0x01, 0x02, 0x03],
    )
}

/// Transport parameters that pass identifier validation for `connection`.
fn valid_parameters(connection: &QuicClientConnection) -> TransportParameters {
    TransportParameters {
        initial_source_connection_id: connection.destination_connection_id(),
        original_destination_connection_id: connection
            .connection_ids()
            .original_destination_cid()
            .cloned(),
        ..TransportParameters::default()
    }
}

fn short_packet(connection: &QuicClientConnection, frames: Vec<Frame>) -> FramePacket {
    FramePacket::short(connection.source_connection_id(), frames)
}

fn connection_close_frames(sender: &RecordingSender) -> Vec<(ConnectionCloseFrame, EncryptionLevel)> {
    sender
        .sent_frames()
        .into_iter()
        .filter_map(|(frame, level)| match frame {
            Frame::ConnectionClose(f) => Some((f, level)),
            _ => None,
        })
        .collect()
}

fn drive_to_connected(fx: &mut Fixture) {
    let packet = short_packet(&fx.connection, vec![Frame::HandshakeDone]);
    fx.connection.process_frames(packet, Instant::now());
    assert_eq!(fx.connection.status(), ConnectionStatus::Connected);
    fx.sender.clear();
}

// ============================================================================
// connect() preconditions and builder validation (RFC 9001 Section 8.1)
// ============================================================================

mod connect_tests {
    use super::*;

    #[test]
    fn connect_requires_non_blank_alpn() {
        let sender = RecordingSender::new();
        let mut connection = QuicClientConnection::builder()
            .connection_id_length(4)
            .uri("//localhost:443")
            .sender(sender)
            .build()
            .unwrap();
        let result = connection.connect(Duration::from_secs(1), " ", Instant::now());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(connection.status(), ConnectionStatus::Idle);
    }

    #[test]
    fn connect_dispatches_the_client_hello() {
        let sender = RecordingSender::new();
        let mut connection = QuicClientConnection::builder()
            .uri("//localhost:443")
            .sender(sender.clone())
            .build()
            .unwrap();
        connection
            .connect(Duration::from_secs(1), "hq-interop", Instant::now())
            .unwrap();

        assert_eq!(connection.status(), ConnectionStatus::Handshaking);
        let sent = sender.sent_frames();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], (Frame::Crypto(_), EncryptionLevel::Initial)));
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut fx = connecting_fixture();
        let result = fx
            .connection
            .connect(Duration::from_secs(1), "hq-interop", Instant::now());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn minimum_version_is_draft_23() {
        let result = QuicClientConnection::builder()
            .version(Version::DRAFT_19)
            .uri("//localhost:443")
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn draft_29_is_supported() {
        let connection = QuicClientConnection::builder()
            .version(Version::DRAFT_29)
            .connection_id_length(4)
            .uri("//localhost:443")
            .build();
        assert!(connection.is_ok());
    }

    #[test]
    fn authority_must_carry_a_port() {
        assert!(QuicClientConnection::builder().uri("//localhost").build().is_err());
        assert!(QuicClientConnection::builder().build().is_err());
    }

    #[test]
    fn handshake_timeout_fails_the_connection() {
        let sender = RecordingSender::new();
        let mut connection = QuicClientConnection::builder()
            .uri("//localhost:443")
            .sender(sender)
            .build()
            .unwrap();
        let start = Instant::now();
        connection
            .connect(Duration::from_millis(100), "hq-interop", start)
            .unwrap();
        assert!(connection.next_timeout().is_some());

        let result = connection.on_timeout(start + Duration::from_millis(200));
        assert_eq!(result, Err(Error::ConnectionTimeout));
        assert_eq!(connection.status(), ConnectionStatus::Closed);
    }
}

// ============================================================================
// Retry handling (RFC 9000 Section 17.2.5, RFC 9001 Section 5.8)
// ============================================================================

mod retry_tests {
    use super::*;

    #[test]
    fn retry_sets_the_initial_token_exactly_once() {
        let mut fx = connecting_fixture();
        assert!(fx.sender.initial_tokens().is_empty());

        let retry = retry_packet(&original_destination_cid());
        fx.connection.process(ParsedPacket::Retry(retry), Instant::now());

        let tokens = fx.sender.initial_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(&tokens[0][..], &[0x01, 0x02, 0x03]);
        // The Initial is re-driven with the new destination CID.
        assert_eq!(
            fx.connection.destination_connection_id().unwrap().as_bytes(),
            &[0x0b, 0x0b, 0x0b, 0x0b]
        );
        assert_eq!(fx.sender.sent_count(), 1);
        assert!(matches!(fx.sender.sent_frames()[0].0, Frame::Crypto(_)));
    }

    #[test]
    fn second_retry_is_ignored() {
        let mut fx = connecting_fixture();
        let retry = retry_packet(&original_destination_cid());
        fx.connection.process(ParsedPacket::Retry(retry), Instant::now());
        fx.sender.clear();

        let second = retry_packet(&original_destination_cid()).with_integrity_tag([
            0x00, 0xf4, 0xbb, 0xc7, 0x27, 0x90, 0xb7, 0xc7, 0x94, 0x7f, 0x86, 0xec, 0x9f, 0xb0,
            0xa6, 0x8d,
        ]);
        fx.connection.process(ParsedPacket::Retry(second), Instant::now());

        assert_eq!(fx.sender.sent_count(), 0);
        assert!(fx.sender.initial_tokens().is_empty());
    }

    #[test]
    fn retry_with_wrong_original_destination_cid_is_discarded() {
        let mut fx = connecting_fixture();
        let unrelated = ConnectionId::from_slice(&[0x03, 0x0a, 0x0d, 0x09]).unwrap();
        let retry = retry_packet(&unrelated);
        fx.connection.process(ParsedPacket::Retry(retry), Instant::now());

        assert_eq!(fx.sender.sent_count(), 0);
        assert!(fx.sender.initial_tokens().is_empty());
    }

    #[test]
    fn retry_with_corrupted_integrity_tag_is_discarded() {
        let mut fx = connecting_fixture();
        let retry = retry_packet(&original_destination_cid()).with_integrity_tag([0xee; 16]);
        fx.connection.process(ParsedPacket::Retry(retry), Instant::now());

        assert_eq!(fx.sender.sent_count(), 0);
        assert!(fx.sender.initial_tokens().is_empty());
    }

    #[test]
    fn retry_after_another_server_packet_is_ignored() {
        let mut fx = connecting_fixture();
        let packet = short_packet(&fx.connection, vec![Frame::Ping]);
        fx.connection.process_frames(packet, Instant::now());
        fx.sender.clear();

        let retry = retry_packet(&original_destination_cid());
        fx.connection.process(ParsedPacket::Retry(retry), Instant::now());
        assert!(fx.sender.initial_tokens().is_empty());
    }
}

// ============================================================================
// Peer transport parameter validation (RFC 9000 Section 7.3)
// ============================================================================

mod transport_parameter_tests {
    use super::*;

    fn fixture_after_retry() -> (Fixture, RetryPacket) {
        let mut fx = connecting_fixture();
        let retry = retry_packet(&original_destination_cid());
        fx.connection.process(ParsedPacket::Retry(retry.clone()), Instant::now());
        fx.sender.clear();
        (fx, retry)
    }

    fn expect_handshake_close_with_parameter_error(sender: &RecordingSender) {
        let closes = connection_close_frames(sender);
        assert_eq!(closes.len(), 1);
        let (frame, level) = &closes[0];
        assert_eq!(frame.error_code, TransportError::TransportParameterError.to_wire());
        assert_eq!(*level, EncryptionLevel::Handshake);
    }

    #[test]
    fn missing_original_destination_cid_after_retry_closes_the_connection() {
        let (mut fx, _retry) = fixture_after_retry();
        fx.connection
            .set_peer_transport_parameters(TransportParameters::default());

        expect_handshake_close_with_parameter_error(&fx.sender);
        assert_eq!(fx.connection.status(), ConnectionStatus::Closing);
    }

    #[test]
    fn incorrect_retry_source_cid_closes_the_connection() {
        let (mut fx, retry) = fixture_after_retry();
        let parameters = TransportParameters {
            initial_source_connection_id: Some(retry.source_cid.clone()),
            original_destination_connection_id: Some(original_destination_cid()),
            retry_source_connection_id: Some(
                ConnectionId::from_slice(&[0x0d, 0x0d, 0x0d, 0x0d]).unwrap(),
            ),
            ..TransportParameters::default()
        };
        fx.connection.set_peer_transport_parameters(parameters);

        expect_handshake_close_with_parameter_error(&fx.sender);
    }

    #[test]
    fn correct_parameters_after_retry_are_accepted() {
        let (mut fx, retry) = fixture_after_retry();
        let parameters = TransportParameters {
            initial_source_connection_id: Some(retry.source_cid.clone()),
            original_destination_connection_id: Some(original_destination_cid()),
            retry_source_connection_id: Some(retry.source_cid.clone()),
            ..TransportParameters::default()
        };
        fx.connection.set_peer_transport_parameters(parameters);

        assert!(connection_close_frames(&fx.sender).is_empty());
        assert!(fx.connection.flow_controller().is_some());
    }

    #[test]
    fn parameters_without_retry_source_are_accepted_on_a_plain_connection() {
        let mut fx = connecting_fixture();
        let parameters = valid_parameters(&fx.connection);
        fx.connection.set_peer_transport_parameters(parameters);

        assert!(connection_close_frames(&fx.sender).is_empty());
    }

    #[test]
    fn retry_source_cid_without_a_retry_closes_the_connection() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            retry_source_connection_id: Some(
                ConnectionId::from_slice(&[0x0d, 0x0d, 0x0d, 0x0d]).unwrap(),
            ),
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        expect_handshake_close_with_parameter_error(&fx.sender);
    }

    #[test]
    fn mismatched_initial_source_cid_closes_the_connection() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            initial_source_connection_id: Some(
                ConnectionId::from_slice(&[0x07, 0x07, 0x07, 0x07]).unwrap(),
            ),
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        expect_handshake_close_with_parameter_error(&fx.sender);
    }
}

// ============================================================================
// Streams (RFC 9000 Section 2.1)
// ============================================================================

mod stream_tests {
    use super::*;

    #[test]
    fn bidirectional_stream_ids_start_at_zero_and_step_by_four() {
        let mut fx = connecting_fixture();
        let parameters = valid_parameters(&fx.connection);
        fx.connection.set_peer_transport_parameters(parameters);

        let first = fx.connection.create_stream(true);
        assert_eq!(first.stream_id().value() & 0x03, 0x00);
        assert_eq!(first.stream_id(), StreamId(0));

        let second = fx.connection.create_stream(true);
        assert_eq!(second.stream_id(), StreamId(first.stream_id().value() + 4));
    }

    #[test]
    fn unidirectional_stream_ids_start_at_two() {
        let mut fx = connecting_fixture();
        assert_eq!(fx.connection.create_stream(false).stream_id(), StreamId(2));
        assert_eq!(fx.connection.create_stream(false).stream_id(), StreamId(6));
    }
}

// ============================================================================
// Flow control wiring (RFC 9000 Section 4)
// ============================================================================

mod flow_control_tests {
    use super::*;

    #[test]
    fn peer_parameters_initialize_the_flow_controller() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            initial_max_data: 100_000,
            initial_max_stream_data_bidi_remote: 9_000,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        let stream = fx.connection.create_stream(true);
        let limit = fx
            .connection
            .flow_controller()
            .unwrap()
            .increase_flow_control_limit(stream.stream_id(), 9_999);
        assert_eq!(limit, 9_000);
    }

    #[test]
    fn max_stream_data_raises_the_stream_limit() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            initial_max_data: 100_000,
            initial_max_stream_data_bidi_remote: 9_000,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);
        let stream = fx.connection.create_stream(true);

        let packet = short_packet(
            &fx.connection,
            vec![Frame::MaxStreamData(MaxStreamDataFrame {
                stream_id: stream.stream_id(),
                maximum_stream_data: 10_000,
            })],
        );
        fx.connection.process_frames(packet, Instant::now());

        let limit = fx
            .connection
            .flow_controller()
            .unwrap()
            .increase_flow_control_limit(stream.stream_id(), 99_999);
        assert_eq!(limit, 10_000);
    }

    #[test]
    fn max_data_raises_the_connection_limit() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            initial_max_data: 1_000,
            initial_max_stream_data_bidi_remote: 9_000,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);
        let stream = fx.connection.create_stream(true);

        let limit = fx
            .connection
            .flow_controller()
            .unwrap()
            .increase_flow_control_limit(stream.stream_id(), 9_999);
        assert_eq!(limit, 1_000);

        let packet = short_packet(
            &fx.connection,
            vec![Frame::MaxData(MaxDataFrame { maximum_data: 4_000 })],
        );
        fx.connection.process_frames(packet, Instant::now());

        let limit = fx
            .connection
            .flow_controller()
            .unwrap()
            .increase_flow_control_limit(stream.stream_id(), 99_999);
        assert_eq!(limit, 4_000);
    }

    #[test]
    fn max_data_updates_are_emitted_on_increment_crossings() {
        let mut fx = connecting_fixture();
        let increment = fx.connection.flow_control_increment();

        // The initial window was advertised in the transport parameters;
        // small consumption owes the peer nothing yet.
        fx.connection.update_connection_flow_control(10);
        assert_eq!(fx.sender.sent_count(), 0);

        fx.connection.update_connection_flow_control(increment);
        assert_eq!(fx.sender.sent_count(), 1);

        fx.connection.update_connection_flow_control(increment * 8 / 10);
        assert_eq!(fx.sender.sent_count(), 1);

        fx.connection.update_connection_flow_control(increment * 21 / 100);
        assert_eq!(fx.sender.sent_count(), 2);

        for (frame, level) in fx.sender.sent_frames() {
            assert!(matches!(frame, Frame::MaxData(_)));
            assert_eq!(level, EncryptionLevel::App);
        }
    }
}

// ============================================================================
// Connection close (RFC 9000 Section 10.2)
// ============================================================================

mod close_tests {
    use super::*;

    #[test]
    fn receiving_close_while_connected_triggers_exactly_one_reply() {
        let mut fx = connecting_fixture();
        drive_to_connected(&mut fx);

        for _ in 0..3 {
            let packet = short_packet(
                &fx.connection,
                vec![Frame::ConnectionClose(ConnectionCloseFrame::no_error())],
            );
            fx.connection.process_frames(packet, Instant::now());
        }

        assert_eq!(connection_close_frames(&fx.sender).len(), 1);
        assert_eq!(fx.connection.status(), ConnectionStatus::Draining);
        assert!(fx.connection.peer_close().is_some());
    }

    #[test]
    fn local_close_sends_exactly_one_connection_close() {
        let mut fx = connecting_fixture();
        drive_to_connected(&mut fx);

        fx.connection.close();
        fx.connection.close();

        assert_eq!(connection_close_frames(&fx.sender).len(), 1);
        assert_eq!(fx.connection.status(), ConnectionStatus::Closing);
        // CONNECTION_CLOSE carries no retransmission bookkeeping.
        assert!(!fx.sender.was_tracked(0));
    }

    #[test]
    fn peer_close_after_local_close_is_not_answered() {
        let mut fx = connecting_fixture();
        drive_to_connected(&mut fx);

        fx.connection.close();
        let packet = short_packet(
            &fx.connection,
            vec![Frame::ConnectionClose(ConnectionCloseFrame::no_error())],
        );
        fx.connection.process_frames(packet, Instant::now());

        assert_eq!(connection_close_frames(&fx.sender).len(), 1);
        assert_eq!(fx.connection.status(), ConnectionStatus::Draining);
    }
}

// ============================================================================
// Connection ID exchange through the connection (RFC 9000 Section 5.1)
// ============================================================================

mod connection_id_tests {
    use super::*;

    fn new_cid_frame_count(sender: &RecordingSender) -> usize {
        sender
            .sent_frames()
            .iter()
            .filter(|(frame, _)| matches!(frame, Frame::NewConnectionId(_)))
            .count()
    }

    #[test]
    fn retire_connection_id_leads_to_a_new_source_cid() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            active_connection_id_limit: 3,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        fx.connection.new_connection_ids(1, 0);
        assert_eq!(fx.connection.connection_ids().source_connection_ids().len(), 2);
        fx.sender.clear();

        let packet = short_packet(
            &fx.connection,
            vec![Frame::RetireConnectionId(RetireConnectionIdFrame { sequence_number: 0 })],
        );
        fx.connection.process_frames(packet, Instant::now());

        assert_eq!(fx.connection.connection_ids().active_source_cid_count(), 2);
        assert_eq!(new_cid_frame_count(&fx.sender), 1);
    }

    #[test]
    fn first_packet_on_an_unused_cid_issues_one_replacement() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            active_connection_id_limit: 7,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        let unused = fx.connection.new_connection_ids(1, 0).remove(0);
        assert_ne!(unused, fx.connection.source_connection_id());
        fx.sender.clear();

        let packet = FramePacket::short(unused, vec![Frame::Padding { length: 20 }]);
        fx.connection.process_frames(packet, Instant::now());

        assert_eq!(new_cid_frame_count(&fx.sender), 1);
    }

    #[test]
    fn no_replacement_once_the_peer_cid_limit_is_reached() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            active_connection_id_limit: 2,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        let unused = fx.connection.new_connection_ids(1, 0).remove(0);
        fx.sender.clear();

        let packet = FramePacket::short(unused, vec![Frame::Padding { length: 20 }]);
        fx.connection.process_frames(packet, Instant::now());

        assert_eq!(fx.sender.sent_count(), 0);
    }

    #[test]
    fn repeated_packets_on_a_used_cid_issue_nothing() {
        let mut fx = connecting_fixture();
        let parameters = TransportParameters {
            active_connection_id_limit: 8,
            ..valid_parameters(&fx.connection)
        };
        fx.connection.set_peer_transport_parameters(parameters);

        let first = fx.connection.source_connection_id();
        let next = fx.connection.new_connection_ids(1, 0).remove(0);
        let packet = FramePacket::short(next, vec![Frame::Padding { length: 20 }]);
        fx.connection.process_frames(packet, Instant::now());
        fx.sender.clear();

        let packet = FramePacket::short(first, vec![Frame::Padding { length: 20 }]);
        fx.connection.process_frames(packet, Instant::now());

        assert_eq!(fx.sender.sent_count(), 0);
    }

    #[test]
    fn retiring_an_unissued_sequence_closes_with_protocol_violation() {
        let mut fx = connecting_fixture();
        drive_to_connected(&mut fx);

        let packet = short_packet(
            &fx.connection,
            vec![Frame::RetireConnectionId(RetireConnectionIdFrame { sequence_number: 42 })],
        );
        fx.connection.process_frames(packet, Instant::now());

        let closes = connection_close_frames(&fx.sender);
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0.error_code, TransportError::ProtocolViolation.to_wire());
    }
}

// ============================================================================
// Version negotiation (RFC 9000 Section 6.2)
// ============================================================================

mod version_negotiation_tests {
    use super::*;
    use crate::packet::VersionNegotiationPacket;

    fn version_negotiation(versions: Vec<u32>) -> ParsedPacket {
        ParsedPacket::VersionNegotiation(VersionNegotiationPacket {
            destination_cid: ConnectionId::from_slice(&[0x0a, 0x0b, 0x0c, 0x0d]).unwrap(),
            source_cid: ConnectionId::from_slice(&[0x0f, 0x0e, 0x0d, 0x0c]).unwrap(),
            supported_versions: versions,
        })
    }

    #[test]
    fn list_containing_our_version_is_ignored() {
        let mut fx = connecting_fixture();
        let vn = version_negotiation(vec![Version::default_version().0]);
        fx.connection.process(vn, Instant::now());
        assert_eq!(fx.connection.status(), ConnectionStatus::Handshaking);
    }

    #[test]
    fn version_negotiation_after_another_packet_is_ignored() {
        let mut fx = connecting_fixture();
        let packet = short_packet(&fx.connection, vec![Frame::Ping]);
        fx.connection.process_frames(packet, Instant::now());

        let vn = version_negotiation(vec![Version::DRAFT_29.0]);
        fx.connection.process(vn, Instant::now());
        assert_eq!(fx.connection.status(), ConnectionStatus::Handshaking);
    }

    #[test]
    fn incompatible_version_list_aborts_the_connect() {
        let mut fx = connecting_fixture();
        let vn = version_negotiation(vec![Version::DRAFT_29.0]);
        fx.connection.process(vn, Instant::now());
        assert_eq!(fx.connection.status(), ConnectionStatus::Closed);
    }
}

// ============================================================================
// Packet parsing through the connection (RFC 9000 Section 17)
// ============================================================================

mod parse_tests {
    use super::*;

    fn connection() -> QuicClientConnection {
        QuicClientConnection::builder()
            .connection_id_length(4)
            .uri("//localhost:443")
            .sender(RecordingSender::new())
            .build()
            .unwrap()
    }

    #[test]
    fn version_negotiation_bytes_parse_as_such() {
        let data = Bytes::from_static(&[
            0xff, 0x00, 0x00, 0x00, 0x00, 0x04, 0x0a, 0x0b, 0x0c, 0x0d, 0x04, 0x0f, 0x0e, 0x0d,
            0x0c, 0xff, 0x00, 0x00, 0x18,
        ]);
        let packet = connection().parse_packet(data).unwrap();
        assert!(matches!(packet, ParsedPacket::VersionNegotiation(_)));
    }

    #[test]
    fn empty_buffer_is_an_invalid_packet() {
        assert_eq!(connection().parse_packet(Bytes::new()).unwrap_err(), Error::InvalidPacket);
    }

    #[test]
    fn truncated_long_headers_are_invalid_packets() {
        let connection = connection();
        for bytes in [&[0xc0u8, 0x00][..], &[0xc0, 0x00, 0x00, 0x00][..]] {
            let result = connection.parse_packet(Bytes::copy_from_slice(bytes));
            assert_eq!(result.unwrap_err(), Error::InvalidPacket);
        }
    }

    #[test]
    fn bare_short_header_is_an_invalid_packet() {
        let result = connection().parse_packet(Bytes::from_static(&[0x40]));
        assert_eq!(result.unwrap_err(), Error::InvalidPacket);
    }

    #[test]
    fn zero_rtt_packets_are_invalid_for_a_client() {
        let data = Bytes::from_static(&[
            0b1101_0001, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x11, 0x00, 0x01, 0x02, 0x03, 0x04,
            0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10,
        ]);
        let result = connection().parse_packet(data);
        assert_eq!(result.unwrap_err(), Error::InvalidPacket);
    }
}

// ============================================================================
// Ack routing into the loss detectors (RFC 9002 Section 6)
// ============================================================================

mod ack_routing_tests {
    use super::*;

    #[test]
    fn ack_of_later_packets_declares_the_first_lost_exactly_once() {
        let mut fx = connecting_fixture();
        let lost: Arc<Mutex<Vec<PacketNumber>>> = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now();

        for pn in [1, 2, 3, 4] {
            let sink = lost.clone();
            fx.connection.register_packet_sent(
                EncryptionLevel::App,
                SentPacket::new(pn, 1200, now, vec![Frame::Ping]),
                Box::new(move |packet| sink.lock().push(packet.packet_number)),
            );
        }

        let ack = AckFrame::from_packet_numbers(&[2, 3, 4]);
        let packet = short_packet(&fx.connection, vec![Frame::Ack(ack.clone())]);
        fx.connection.process_frames(packet, now);
        assert_eq!(lost.lock().clone(), vec![1]);

        // A duplicate ack must not re-declare the loss.
        let packet = short_packet(&fx.connection, vec![Frame::Ack(ack)]);
        fx.connection.process_frames(packet, now);
        assert_eq!(lost.lock().clone(), vec![1]);
    }

    #[test]
    fn acks_are_routed_to_the_space_of_their_level() {
        let mut fx = connecting_fixture();
        let lost: Arc<Mutex<Vec<PacketNumber>>> = Arc::new(Mutex::new(Vec::new()));
        let now = Instant::now();

        // Packets 1..=4 live in the handshake space; an application-level
        // ack for the same numbers must not touch them.
        for pn in [1, 2, 3, 4] {
            let sink = lost.clone();
            fx.connection.register_packet_sent(
                EncryptionLevel::Handshake,
                SentPacket::new(pn, 1200, now, vec![Frame::Ping]),
                Box::new(move |packet| sink.lock().push(packet.packet_number)),
            );
        }

        let ack = AckFrame::from_packet_numbers(&[2, 3, 4]);
        let packet = short_packet(&fx.connection, vec![Frame::Ack(ack)]);
        fx.connection.process_frames(packet, now);
        assert!(lost.lock().is_empty());
    }
}
