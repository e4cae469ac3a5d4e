//! Client connection state machine (RFC 9000 Sections 5, 7, 10).
//!
//! The connection is a pure state machine: datagrams and time come in,
//! frames leave through the sender façade, and one logical task owns all
//! mutation. Timers are surfaced through
//! [`QuicClientConnection::next_timeout`] and driven by the caller via
//! [`QuicClientConnection::on_timeout`].

use super::cid_manager::ConnectionIdManager;
use crate::error::{Error, Result, TransportError};
use crate::flow_control::{ConnectionReceiveWindow, FlowController};
use crate::frames::{ConnectionCloseFrame, CryptoFrame, Frame, MaxDataFrame, PathResponseFrame};
use crate::packet::{
    FramePacket, PacketNumberSpaceManager, PacketParser, PacketProtection, ParsedPacket,
    PlaintextProtection, RetryPacket, VersionNegotiationPacket,
};
use crate::qlog::{NullQlog, QlogPacketType, QlogSink};
use crate::recovery::{
    LostPacketCallback, NewRenoCongestionController, RttEstimator, SentPacket,
    SharedCongestionController,
};
use crate::send::{send_resend_on_loss, QueuedSender, Sender, SenderCommand};
use crate::tls::{NullTlsEngine, TlsEngine};
use crate::transport::TransportParameters;
use crate::types::{ConnectionId, EncryptionLevel, PacketNumberSpace, StreamId};
use crate::version::Version;
use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connection lifecycle states (RFC 9000 Sections 5, 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Created, not yet connecting.
    Idle,
    /// Handshake in progress.
    Handshaking,
    /// Handshake complete, connection usable.
    Connected,
    /// We sent CONNECTION_CLOSE and are waiting out the close period.
    Closing,
    /// The peer closed; we only wait.
    Draining,
    /// Terminal.
    Closed,
}

/// Handle to a locally opened stream. Stream data transfer lives outside
/// the connection engine; the handle carries the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicStream {
    stream_id: StreamId,
}

impl QuicStream {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

/// Builder for [`QuicClientConnection`].
///
/// The sender, TLS engine, congestion controller and packet protection are
/// injectable seams; production wiring and tests use the same doors.
pub struct QuicClientConnectionBuilder {
    version: Version,
    connection_id_length: usize,
    authority: Option<String>,
    local_parameters: TransportParameters,
    sender: Option<Arc<dyn Sender>>,
    tls_engine: Option<Box<dyn TlsEngine>>,
    congestion_controller: Option<SharedCongestionController>,
    protection: Option<Box<dyn PacketProtection>>,
    qlog: Option<Box<dyn QlogSink>>,
}

impl QuicClientConnectionBuilder {
    /// Protocol version to offer. Versions older than draft-23 are
    /// rejected at build time.
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Length of the connection IDs this endpoint issues (0..=20,
    /// default 4).
    pub fn connection_id_length(mut self, length: usize) -> Self {
        self.connection_id_length = length;
        self
    }

    /// Server authority, `host:port` (a leading `//` is accepted).
    pub fn uri(mut self, authority: &str) -> Self {
        self.authority = Some(authority.to_string());
        self
    }

    /// Transport parameters to advertise; the receive window is sized from
    /// `initial_max_data`.
    pub fn transport_parameters(mut self, parameters: TransportParameters) -> Self {
        self.local_parameters = parameters;
        self
    }

    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn tls_engine(mut self, tls: Box<dyn TlsEngine>) -> Self {
        self.tls_engine = Some(tls);
        self
    }

    pub fn congestion_controller(mut self, congestion: SharedCongestionController) -> Self {
        self.congestion_controller = Some(congestion);
        self
    }

    pub fn packet_protection(mut self, protection: Box<dyn PacketProtection>) -> Self {
        self.protection = Some(protection);
        self
    }

    /// Structured event sink for connection-lifecycle qlog events.
    pub fn logger(mut self, qlog: Box<dyn QlogSink>) -> Self {
        self.qlog = Some(qlog);
        self
    }

    pub fn build(self) -> Result<QuicClientConnection> {
        if !self.version.at_least(Version::MINIMUM) {
            return Err(Error::InvalidArgument("version older than draft-23"));
        }
        if self.connection_id_length > crate::types::MAX_CID_LENGTH {
            return Err(Error::InvalidArgument("connection ID length exceeds 20"));
        }
        let authority = self
            .authority
            .ok_or(Error::InvalidArgument("server authority required"))?;
        let (server_name, port) = parse_authority(&authority)?;

        let congestion: SharedCongestionController = self
            .congestion_controller
            .unwrap_or_else(|| Arc::new(Mutex::new(NewRenoCongestionController::new())));

        let mut send_queue = None;
        let sender: Arc<dyn Sender> = match self.sender {
            Some(sender) => sender,
            None => {
                let (sender, queue) = QueuedSender::new(congestion.clone());
                send_queue = Some(queue);
                Arc::new(sender)
            }
        };

        let rtt = Arc::new(Mutex::new(RttEstimator::default()));
        let receive_window = ConnectionReceiveWindow::new(self.local_parameters.initial_max_data);

        Ok(QuicClientConnection {
            version: self.version,
            status: ConnectionStatus::Idle,
            server_name,
            port,
            parser: PacketParser::new(self.connection_id_length),
            cid_manager: ConnectionIdManager::new(self.connection_id_length, sender.clone()),
            spaces: PacketNumberSpaceManager::new(congestion.clone(), rtt.clone()),
            congestion,
            rtt,
            sender,
            tls: self.tls_engine.unwrap_or_else(|| Box::new(NullTlsEngine::default())),
            protection: self.protection.unwrap_or_else(|| Box::new(PlaintextProtection)),
            qlog: self.qlog.unwrap_or_else(|| Box::new(NullQlog)),
            local_parameters: self.local_parameters,
            peer_parameters: None,
            flow_controller: None,
            receive_window,
            initial_crypto: None,
            new_token: None,
            processed_server_packets: 0,
            retry_processed: false,
            server_cid_adopted: false,
            connection_close_sent: false,
            peer_close: None,
            handshake_deadline: None,
            idle_timeout: None,
            last_activity: None,
            next_bidi_stream_id: 0,
            next_uni_stream_id: 2,
            send_queue,
        })
    }
}

fn parse_authority(authority: &str) -> Result<(String, u16)> {
    let trimmed = authority.trim_start_matches('/');
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or(Error::InvalidArgument("authority must carry a port"))?;
    if host.is_empty() {
        return Err(Error::InvalidArgument("authority must carry a host"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidArgument("authority port is not a number"))?;
    Ok((host.to_string(), port))
}

fn default_local_parameters() -> TransportParameters {
    TransportParameters {
        max_idle_timeout: 30_000,
        initial_max_data: 10 * 1024 * 1024,
        initial_max_stream_data_bidi_local: 1024 * 1024,
        initial_max_stream_data_bidi_remote: 1024 * 1024,
        initial_max_stream_data_uni: 1024 * 1024,
        initial_max_streams_bidi: 100,
        initial_max_streams_uni: 100,
        active_connection_id_limit: 8,
        ..TransportParameters::default()
    }
}

/// A client-side QUIC connection engine.
pub struct QuicClientConnection {
    version: Version,
    status: ConnectionStatus,
    server_name: String,
    port: u16,
    parser: PacketParser,
    cid_manager: ConnectionIdManager,
    spaces: PacketNumberSpaceManager,
    congestion: SharedCongestionController,
    rtt: Arc<Mutex<RttEstimator>>,
    sender: Arc<dyn Sender>,
    tls: Box<dyn TlsEngine>,
    protection: Box<dyn PacketProtection>,
    qlog: Box<dyn QlogSink>,
    local_parameters: TransportParameters,
    peer_parameters: Option<TransportParameters>,
    flow_controller: Option<FlowController>,
    receive_window: ConnectionReceiveWindow,
    /// ClientHello bytes, kept to re-drive the Initial after a Retry.
    initial_crypto: Option<Bytes>,
    new_token: Option<Bytes>,
    processed_server_packets: u64,
    retry_processed: bool,
    server_cid_adopted: bool,
    connection_close_sent: bool,
    peer_close: Option<(u64, Bytes)>,
    handshake_deadline: Option<Instant>,
    idle_timeout: Option<Duration>,
    last_activity: Option<Instant>,
    next_bidi_stream_id: u64,
    next_uni_stream_id: u64,
    send_queue: Option<Receiver<SenderCommand>>,
}

impl QuicClientConnection {
    pub fn builder() -> QuicClientConnectionBuilder {
        QuicClientConnectionBuilder {
            version: Version::default_version(),
            connection_id_length: 4,
            authority: None,
            local_parameters: default_local_parameters(),
            sender: None,
            tls_engine: None,
            congestion_controller: None,
            protection: None,
            qlog: None,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start connecting: validate arguments, pick the original destination
    /// CID, request the ClientHello from the TLS engine and dispatch the
    /// first Initial flight. The handshake must complete before
    /// `now + timeout` or [`on_timeout`](Self::on_timeout) fails the
    /// connection with [`Error::ConnectionTimeout`].
    pub fn connect(&mut self, timeout: Duration, alpn: &str, now: Instant) -> Result<()> {
        if self.status != ConnectionStatus::Idle {
            return Err(Error::InvalidArgument("connection already started"));
        }
        if alpn.trim().is_empty() {
            return Err(Error::InvalidArgument("ALPN must not be blank"));
        }

        let odcid = self.cid_manager.generate_original_destination_cid();
        let server_name = self.server_name.clone();
        let client_hello = self.tls.start_handshake(&server_name, alpn)?;
        self.initial_crypto = Some(client_hello.clone());

        self.status = ConnectionStatus::Handshaking;
        self.handshake_deadline = Some(now + timeout);
        self.last_activity = Some(now);

        self.qlog.connection_started(&odcid);
        tracing::info!(
            server = %self.server_name,
            port = self.port,
            version = %self.version,
            odcid = %odcid,
            "connecting"
        );

        send_resend_on_loss(
            &self.sender,
            Frame::Crypto(CryptoFrame { offset: 0, data: client_hello }),
            EncryptionLevel::Initial,
        );
        Ok(())
    }

    /// Close the connection locally. One CONNECTION_CLOSE leaves per
    /// direction; repeated calls are no-ops.
    pub fn close(&mut self) {
        match self.status {
            ConnectionStatus::Handshaking | ConnectionStatus::Connected => {
                if !self.connection_close_sent {
                    self.sender.send_untracked(
                        Frame::ConnectionClose(ConnectionCloseFrame::no_error()),
                        EncryptionLevel::App,
                    );
                    self.connection_close_sent = true;
                }
                self.status = ConnectionStatus::Closing;
            }
            _ => {}
        }
    }

    /// Open a new locally-initiated stream. Client stream IDs start at 0
    /// (bidirectional) and 2 (unidirectional) and step by 4.
    pub fn create_stream(&mut self, bidirectional: bool) -> QuicStream {
        let id = if bidirectional {
            let id = self.next_bidi_stream_id;
            self.next_bidi_stream_id += 4;
            id
        } else {
            let id = self.next_uni_stream_id;
            self.next_uni_stream_id += 4;
            id
        };
        QuicStream { stream_id: StreamId(id) }
    }

    // ------------------------------------------------------------------
    // Inbound packets
    // ------------------------------------------------------------------

    /// Parse a single packet from raw bytes using this connection's CID
    /// length.
    pub fn parse_packet(&self, data: Bytes) -> Result<ParsedPacket> {
        let mut buf = data;
        self.parser.parse_packet(&mut buf)
    }

    /// Parse and process every packet in a datagram. Malformed or
    /// unknown-version packets are discarded without affecting connection
    /// state.
    pub fn process_datagram(&mut self, data: Bytes, now: Instant) {
        match self.parser.parse_datagram(data) {
            Ok(packets) => {
                for packet in packets {
                    self.process(packet, now);
                }
            }
            Err(error) => {
                tracing::debug!(%error, "datagram discarded");
            }
        }
    }

    /// Process one parsed packet.
    pub fn process(&mut self, packet: ParsedPacket, now: Instant) {
        match packet {
            ParsedPacket::VersionNegotiation(vn) => self.process_version_negotiation(&vn),
            ParsedPacket::Retry(retry) => self.process_retry(&retry),
            ParsedPacket::Protected(protected) => {
                let space = PacketNumberSpace::for_level(protected.level);
                let largest = self.spaces.get(space).largest_received();
                match self.protection.open(&protected, largest) {
                    Ok(frame_packet) => {
                        if protected.level == EncryptionLevel::Initial && !self.server_cid_adopted {
                            if let Some(scid) = protected.source_cid.clone() {
                                self.cid_manager.replace_initial_destination_cid(scid);
                                self.server_cid_adopted = true;
                            }
                        }
                        self.process_frames(frame_packet, now);
                    }
                    Err(error) => {
                        tracing::debug!(%error, "undecryptable packet discarded");
                    }
                }
            }
        }
    }

    /// Handle a Retry packet (RFC 9000 Section 17.2.5.2).
    ///
    /// At most one Retry is accepted per connection, only before any other
    /// server packet, and only with a valid integrity tag over the
    /// recorded original destination CID.
    pub fn process_retry(&mut self, retry: &RetryPacket) {
        if self.retry_processed || self.processed_server_packets > 0 {
            tracing::debug!("late or repeated retry packet ignored");
            return;
        }
        let odcid = match self.cid_manager.original_destination_cid() {
            Some(odcid) => odcid.clone(),
            None => return,
        };
        if !retry.verify_integrity(&odcid) {
            tracing::debug!("retry packet with bad integrity tag discarded");
            return;
        }

        self.retry_processed = true;
        self.cid_manager.replace_initial_destination_cid(retry.source_cid.clone());
        self.cid_manager.set_retry_source_cid(retry.source_cid.clone());
        self.sender.set_initial_token(retry.retry_token.clone());

        // Re-drive the Initial with the new destination CID and token.
        if let Some(client_hello) = self.initial_crypto.clone() {
            send_resend_on_loss(
                &self.sender,
                Frame::Crypto(CryptoFrame { offset: 0, data: client_hello }),
                EncryptionLevel::Initial,
            );
        }
        tracing::debug!(scid = %retry.source_cid, "retry accepted, initial re-dispatched");
    }

    /// Handle a Version Negotiation packet (RFC 9000 Section 6.2).
    ///
    /// Ignored after any processed server packet and whenever the offered
    /// list contains our own version (a downgrade bait). Otherwise the
    /// connection aborts; selecting another version is not attempted.
    pub fn process_version_negotiation(&mut self, vn: &VersionNegotiationPacket) {
        if self.processed_server_packets > 0 || self.retry_processed {
            return;
        }
        if vn.supported_versions.contains(&self.version.0) {
            tracing::debug!("version negotiation offering our own version ignored");
            return;
        }
        tracing::warn!(
            offered = ?vn.supported_versions,
            ours = %self.version,
            "no common version, aborting connect"
        );
        self.status = ConnectionStatus::Closed;
    }

    /// Process the frames of a decrypted packet. Side effects are only
    /// applied here, after packet authentication.
    pub fn process_frames(&mut self, packet: FramePacket, now: Instant) {
        if matches!(self.status, ConnectionStatus::Closed) {
            return;
        }
        self.processed_server_packets += 1;
        self.last_activity = Some(now);

        let space = PacketNumberSpace::for_level(packet.level);
        let ack_eliciting = packet.frames.iter().any(Frame::is_ack_eliciting);
        self.spaces
            .get_mut(space)
            .on_packet_received(packet.packet_number, ack_eliciting);

        self.cid_manager.register_used_cid(packet.destination_cid.as_bytes());

        for frame in packet.frames {
            if let Err(error) = self.handle_frame(packet.level, frame, now) {
                let code = match error {
                    Error::Transport(code) => code,
                    _ => TransportError::InternalError,
                };
                self.immediate_close(EncryptionLevel::App, code);
                break;
            }
        }
    }

    fn handle_frame(
        &mut self,
        level: EncryptionLevel,
        frame: Frame,
        now: Instant,
    ) -> Result<()> {
        let space = PacketNumberSpace::for_level(level);
        match frame {
            Frame::Ack(ack) => {
                let exponent = self
                    .peer_parameters
                    .as_ref()
                    .map(|p| p.ack_delay_exponent)
                    .unwrap_or(3);
                let ack_delay = Duration::from_micros(
                    ack.ack_delay.checked_shl(exponent as u32).unwrap_or(u64::MAX),
                );
                let (_, lost) = self
                    .spaces
                    .get_mut(space)
                    .loss_detector_mut()
                    .on_ack_received(&ack, ack_delay, now);
                for pn in lost {
                    self.qlog.packet_lost(QlogPacketType::for_level(level), pn);
                }
                Ok(())
            }

            Frame::Crypto(crypto) => {
                let flights = self.tls.consume_handshake_data(level, &crypto.data)?;
                for flight in flights {
                    send_resend_on_loss(
                        &self.sender,
                        Frame::Crypto(CryptoFrame { offset: 0, data: flight.data }),
                        flight.level,
                    );
                }
                if self.tls.is_handshake_complete()
                    && self.status == ConnectionStatus::Handshaking
                {
                    if let Some(raw) = self.tls.peer_transport_parameters() {
                        let parameters = TransportParameters::decode(raw)?;
                        self.set_peer_transport_parameters(parameters);
                    }
                    if self.status == ConnectionStatus::Handshaking {
                        self.on_handshake_complete();
                    }
                }
                Ok(())
            }

            Frame::MaxData(MaxDataFrame { maximum_data }) => {
                if let Some(flow) = self.flow_controller.as_mut() {
                    flow.update_connection_limit(maximum_data);
                }
                Ok(())
            }

            Frame::MaxStreamData(f) => {
                if let Some(flow) = self.flow_controller.as_mut() {
                    flow.update_stream_limit(f.stream_id, f.maximum_stream_data);
                }
                Ok(())
            }

            Frame::NewConnectionId(f) => self.cid_manager.process_new_connection_id(&f),

            Frame::RetireConnectionId(f) => {
                self.cid_manager.process_retire_connection_id(f.sequence_number)
            }

            Frame::ConnectionClose(close) => {
                self.handle_peer_close(&close);
                Ok(())
            }

            Frame::PathChallenge(challenge) => {
                self.sender.send_untracked(
                    Frame::PathResponse(PathResponseFrame { data: challenge.data }),
                    level,
                );
                Ok(())
            }

            Frame::NewToken(token) => {
                self.new_token = Some(token.token);
                Ok(())
            }

            Frame::HandshakeDone => {
                // The server confirms the handshake; handshake keys and
                // state are done for (RFC 9001 Section 4.9.2).
                if self.status == ConnectionStatus::Handshaking {
                    self.on_handshake_complete();
                }
                self.spaces.get_mut(PacketNumberSpace::Handshake).discard();
                Ok(())
            }

            Frame::Stream(stream) => {
                tracing::trace!(stream = %stream.stream_id, len = stream.data.len(), "stream data");
                Ok(())
            }

            // No connection-level effect beyond ack-eliciting status.
            Frame::Padding { .. }
            | Frame::Ping
            | Frame::ResetStream(_)
            | Frame::StopSending(_)
            | Frame::MaxStreams(_)
            | Frame::DataBlocked(_)
            | Frame::StreamDataBlocked(_)
            | Frame::StreamsBlocked(_)
            | Frame::PathResponse(_) => Ok(()),
        }
    }

    fn handle_peer_close(&mut self, close: &ConnectionCloseFrame) {
        self.peer_close = Some((close.error_code, close.reason.clone()));
        match self.status {
            ConnectionStatus::Connected => {
                if !self.connection_close_sent {
                    self.sender.send_untracked(
                        Frame::ConnectionClose(ConnectionCloseFrame::no_error()),
                        EncryptionLevel::App,
                    );
                    self.connection_close_sent = true;
                }
                self.status = ConnectionStatus::Draining;
            }
            ConnectionStatus::Closed => {}
            _ => {
                self.status = ConnectionStatus::Draining;
            }
        }
    }

    fn on_handshake_complete(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.handshake_deadline = None;
        tracing::info!(server = %self.server_name, "handshake complete");
    }

    // ------------------------------------------------------------------
    // Transport parameters
    // ------------------------------------------------------------------

    /// Apply the peer's transport parameters, once, during the handshake.
    ///
    /// Identifier validation per RFC 9000 Section 7.3: the peer must echo
    /// the destination CID we actually used on the wire (the post-Retry
    /// value when a Retry happened), the original destination CID from
    /// before any Retry, and the Retry source CID exactly when a Retry
    /// occurred. Any violation closes the connection at the Handshake
    /// level with TRANSPORT_PARAMETER_ERROR.
    pub fn set_peer_transport_parameters(&mut self, parameters: TransportParameters) {
        if parameters.validate().is_err() {
            self.immediate_close(
                EncryptionLevel::Handshake,
                TransportError::TransportParameterError,
            );
            return;
        }

        let initial_source_ok = match (
            &parameters.initial_source_connection_id,
            self.cid_manager.current_destination_cid(),
        ) {
            (Some(claimed), Some(used)) => claimed == used,
            _ => false,
        };
        let original_destination_ok = match (
            &parameters.original_destination_connection_id,
            self.cid_manager.original_destination_cid(),
        ) {
            (Some(claimed), Some(original)) => claimed == original,
            _ => false,
        };
        let retry_source_ok = if self.retry_processed {
            match (&parameters.retry_source_connection_id, self.cid_manager.retry_source_cid()) {
                (Some(claimed), Some(retry_scid)) => claimed == retry_scid,
                _ => false,
            }
        } else {
            parameters.retry_source_connection_id.is_none()
        };

        if !initial_source_ok || !original_destination_ok || !retry_source_ok {
            tracing::warn!("peer transport parameters failed identifier validation");
            self.immediate_close(
                EncryptionLevel::Handshake,
                TransportError::TransportParameterError,
            );
            return;
        }

        self.cid_manager
            .set_peer_active_cid_limit(parameters.active_connection_id_limit);
        self.flow_controller = Some(FlowController::new(&parameters));
        if parameters.max_idle_timeout > 0 {
            let peer = Duration::from_millis(parameters.max_idle_timeout);
            let local = Duration::from_millis(self.local_parameters.max_idle_timeout);
            self.idle_timeout = Some(if self.local_parameters.max_idle_timeout > 0 {
                peer.min(local)
            } else {
                peer
            });
        }
        self.peer_parameters = Some(parameters);
    }

    /// Send one CONNECTION_CLOSE with `error` at `level` and move to
    /// Closing. Never emits a second close frame.
    pub fn immediate_close(&mut self, level: EncryptionLevel, error: TransportError) {
        if !self.connection_close_sent {
            self.sender.send_untracked(
                Frame::ConnectionClose(ConnectionCloseFrame::transport(error.to_wire())),
                level,
            );
            self.connection_close_sent = true;
        }
        self.status = ConnectionStatus::Closing;
        tracing::warn!(%error, "connection closed with error");
    }

    // ------------------------------------------------------------------
    // Outbound bookkeeping
    // ------------------------------------------------------------------

    /// Record a packet the sender pushed to the wire, wiring it into the
    /// right space's loss detector.
    pub fn register_packet_sent(
        &mut self,
        level: EncryptionLevel,
        packet: SentPacket,
        on_lost: LostPacketCallback,
    ) {
        self.qlog.packet_sent(
            QlogPacketType::for_level(level),
            packet.packet_number,
            packet.size,
        );
        let space = PacketNumberSpace::for_level(level);
        self.spaces.get_mut(space).loss_detector_mut().packet_sent(packet, on_lost);
    }

    /// Account application-consumed receive bytes; emits a MAX_DATA frame
    /// whenever a full window increment has been consumed since the last
    /// advertisement.
    pub fn update_connection_flow_control(&mut self, delta: u64) {
        if let Some(maximum_data) = self.receive_window.on_consumed(delta) {
            send_resend_on_loss(
                &self.sender,
                Frame::MaxData(MaxDataFrame { maximum_data }),
                EncryptionLevel::App,
            );
        }
    }

    /// Issue fresh source connection IDs (delegates to the CID manager).
    pub fn new_connection_ids(&mut self, count: usize, retire_prior_to: u64) -> Vec<ConnectionId> {
        self.cid_manager.new_connection_ids(count, retire_prior_to)
    }

    /// Retire the peer-issued destination CID at `sequence_number`.
    pub fn retire_destination_connection_id(&mut self, sequence_number: u64) {
        self.cid_manager.retire_destination_connection_id(sequence_number);
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// The next instant at which [`on_timeout`](Self::on_timeout) must be
    /// called: handshake deadline, loss-detection deadline or idle
    /// timeout, whichever comes first.
    pub fn next_timeout(&self) -> Option<Instant> {
        let mut deadlines = Vec::with_capacity(3);
        if self.status == ConnectionStatus::Handshaking {
            if let Some(deadline) = self.handshake_deadline {
                deadlines.push(deadline);
            }
        }
        if let Some(loss_time) = self.spaces.earliest_loss_time() {
            deadlines.push(loss_time);
        }
        if self.status == ConnectionStatus::Connected {
            if let (Some(idle), Some(last)) = (self.idle_timeout, self.last_activity) {
                deadlines.push(last + idle);
            }
        }
        deadlines.into_iter().min()
    }

    /// Drive time-based processing: handshake timeout, loss detection
    /// re-runs and the idle timeout.
    pub fn on_timeout(&mut self, now: Instant) -> Result<()> {
        if self.status == ConnectionStatus::Handshaking {
            if let Some(deadline) = self.handshake_deadline {
                if now >= deadline {
                    tracing::warn!(server = %self.server_name, "handshake timed out");
                    self.release_resources();
                    self.status = ConnectionStatus::Closed;
                    return Err(Error::ConnectionTimeout);
                }
            }
        }

        for space in [
            PacketNumberSpace::Initial,
            PacketNumberSpace::Handshake,
            PacketNumberSpace::Application,
        ] {
            let detector = self.spaces.get_mut(space).loss_detector_mut();
            if detector.loss_time().is_some_and(|t| now >= t) {
                let lost = detector.detect_lost_packets(now);
                for pn in lost {
                    self.qlog.packet_lost(qlog_type_for_space(space), pn);
                }
            }
        }

        if self.status == ConnectionStatus::Connected {
            if let (Some(idle), Some(last)) = (self.idle_timeout, self.last_activity) {
                if now >= last + idle {
                    tracing::info!("idle timeout, closing silently");
                    self.release_resources();
                    self.status = ConnectionStatus::Closed;
                }
            }
        }
        Ok(())
    }

    fn release_resources(&mut self) {
        for space in [
            PacketNumberSpace::Initial,
            PacketNumberSpace::Handshake,
            PacketNumberSpace::Application,
        ] {
            self.spaces.get_mut(space).discard();
        }
        self.handshake_deadline = None;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The destination CID outgoing packets currently carry.
    pub fn destination_connection_id(&self) -> Option<ConnectionId> {
        self.cid_manager.current_destination_cid().cloned()
    }

    pub fn source_connection_id(&self) -> ConnectionId {
        self.cid_manager.current_source_cid().clone()
    }

    pub fn connection_ids(&self) -> &ConnectionIdManager {
        &self.cid_manager
    }

    pub(crate) fn connection_ids_mut(&mut self) -> &mut ConnectionIdManager {
        &mut self.cid_manager
    }

    /// Send-side flow controller; `None` until the peer's transport
    /// parameters arrived.
    pub fn flow_controller(&mut self) -> Option<&mut FlowController> {
        self.flow_controller.as_mut()
    }

    /// Window increment governing MAX_DATA emission.
    pub fn flow_control_increment(&self) -> u64 {
        self.receive_window.increment()
    }

    /// Address-validation token from a NEW_TOKEN frame, for future
    /// connections to the same server.
    pub fn new_token(&self) -> Option<&Bytes> {
        self.new_token.as_ref()
    }

    /// Error and reason from the peer's CONNECTION_CLOSE, if one arrived.
    pub fn peer_close(&self) -> Option<Error> {
        self.peer_close.as_ref().map(|(error_code, reason)| Error::PeerConnectionClose {
            error_code: *error_code,
            reason: reason.clone(),
        })
    }

    pub fn congestion_controller(&self) -> SharedCongestionController {
        self.congestion.clone()
    }

    /// Current smoothed round-trip estimate.
    pub fn smoothed_rtt(&self) -> Duration {
        self.rtt.lock().smoothed_rtt()
    }

    /// The command queue feeding the sender task, when the builder created
    /// the default [`QueuedSender`].
    pub fn take_send_queue(&mut self) -> Option<Receiver<SenderCommand>> {
        self.send_queue.take()
    }
}

fn qlog_type_for_space(space: PacketNumberSpace) -> QlogPacketType {
    match space {
        PacketNumberSpace::Initial => QlogPacketType::Initial,
        PacketNumberSpace::Handshake => QlogPacketType::Handshake,
        PacketNumberSpace::Application => QlogPacketType::OneRtt,
    }
}
