//! Connection ID lifecycle (RFC 9000 Section 5.1).
//!
//! Two sequence-numbered registries: the IDs this endpoint issued
//! (source) and the IDs the peer issued (destination). Entries move
//! NEW -> USED -> RETIRED and never backwards. The number of live IDs the
//! peer must track stays within its advertised
//! `active_connection_id_limit`.

use crate::error::{Error, Result, TransportError};
use crate::frames::{Frame, NewConnectionIdFrame, RetireConnectionIdFrame};
use crate::send::{send_resend_on_loss, Sender};
use crate::types::{ConnectionId, EncryptionLevel};
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lifecycle of one connection ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIdStatus {
    /// Issued but not yet seen on the wire.
    New,
    /// Carried by at least one packet.
    Used,
    /// Retired; never usable again.
    Retired,
}

/// Registry entry for one connection ID.
#[derive(Debug, Clone)]
pub struct ConnectionIdInfo {
    pub sequence_number: u64,
    pub connection_id: ConnectionId,
    pub status: ConnectionIdStatus,
    pub stateless_reset_token: Option<[u8; 16]>,
}

/// Manages both connection ID registries for one connection.
pub struct ConnectionIdManager {
    cid_length: usize,
    sender: Arc<dyn Sender>,
    source_cids: BTreeMap<u64, ConnectionIdInfo>,
    next_source_sequence: u64,
    destination_cids: BTreeMap<u64, ConnectionIdInfo>,
    /// The DCID the very first Initial was sent to, recorded for retry
    /// integrity verification and transport parameter validation.
    original_destination_cid: Option<ConnectionId>,
    /// Source CID of the Retry packet, when one was accepted.
    retry_source_cid: Option<ConnectionId>,
    /// Largest `retire_prior_to` the peer has announced.
    retire_prior_to: u64,
    /// The peer's `active_connection_id_limit`.
    peer_active_cid_limit: u64,
}

impl ConnectionIdManager {
    pub fn new(cid_length: usize, sender: Arc<dyn Sender>) -> Self {
        let mut source_cids = BTreeMap::new();
        // The initial source CID is on the wire from the first flight.
        source_cids.insert(
            0,
            ConnectionIdInfo {
                sequence_number: 0,
                connection_id: ConnectionId::random(cid_length),
                status: ConnectionIdStatus::Used,
                stateless_reset_token: None,
            },
        );
        Self {
            cid_length,
            sender,
            source_cids,
            next_source_sequence: 1,
            destination_cids: BTreeMap::new(),
            original_destination_cid: None,
            retry_source_cid: None,
            retire_prior_to: 0,
            peer_active_cid_limit: 2,
        }
    }

    // ------------------------------------------------------------------
    // Destination side
    // ------------------------------------------------------------------

    /// Generate the random destination CID the first Initial is addressed
    /// to (RFC 9000 Section 7.2: at least 8 bytes).
    pub fn generate_original_destination_cid(&mut self) -> ConnectionId {
        let cid = ConnectionId::random(8);
        self.set_original_destination_cid(cid.clone());
        cid
    }

    /// Fix the original destination CID explicitly. Seam for tests that
    /// need a deterministic retry integrity tag.
    pub fn set_original_destination_cid(&mut self, cid: ConnectionId) {
        self.original_destination_cid = Some(cid.clone());
        self.destination_cids.insert(
            0,
            ConnectionIdInfo {
                sequence_number: 0,
                connection_id: cid,
                status: ConnectionIdStatus::Used,
                stateless_reset_token: None,
            },
        );
    }

    /// Replace the provisional destination CID with the one the server
    /// chose: its Retry source CID or the SCID of its first Initial.
    pub fn replace_initial_destination_cid(&mut self, cid: ConnectionId) {
        self.destination_cids.insert(
            0,
            ConnectionIdInfo {
                sequence_number: 0,
                connection_id: cid,
                status: ConnectionIdStatus::Used,
                stateless_reset_token: None,
            },
        );
    }

    /// The destination CID outgoing packets currently carry.
    pub fn current_destination_cid(&self) -> Option<&ConnectionId> {
        self.destination_cids
            .values()
            .find(|info| info.status != ConnectionIdStatus::Retired)
            .map(|info| &info.connection_id)
    }

    pub fn original_destination_cid(&self) -> Option<&ConnectionId> {
        self.original_destination_cid.as_ref()
    }

    pub fn set_retry_source_cid(&mut self, cid: ConnectionId) {
        self.retry_source_cid = Some(cid);
    }

    pub fn retry_source_cid(&self) -> Option<&ConnectionId> {
        self.retry_source_cid.as_ref()
    }

    /// Handle a NEW_CONNECTION_ID frame from the peer.
    ///
    /// Reordering rule: a sequence number below the already-announced
    /// retirement threshold is answered with an immediate
    /// RETIRE_CONNECTION_ID instead of being stored.
    pub fn process_new_connection_id(&mut self, frame: &NewConnectionIdFrame) -> Result<()> {
        if frame.retire_prior_to > frame.sequence_number {
            return Err(Error::Transport(TransportError::ProtocolViolation));
        }
        if let Some(existing) = self.destination_cids.get(&frame.sequence_number) {
            if existing.connection_id != frame.connection_id {
                return Err(Error::Transport(TransportError::ProtocolViolation));
            }
        }

        if frame.sequence_number < self.retire_prior_to {
            // The frame was reordered behind the announcement that retired
            // it; the peer defines retirement by sequence number, so just
            // confirm it.
            self.send_retire_destination(frame.sequence_number);
            return Ok(());
        }

        self.destination_cids.insert(
            frame.sequence_number,
            ConnectionIdInfo {
                sequence_number: frame.sequence_number,
                connection_id: frame.connection_id.clone(),
                status: ConnectionIdStatus::New,
                stateless_reset_token: Some(frame.stateless_reset_token),
            },
        );

        if frame.retire_prior_to > self.retire_prior_to {
            self.retire_prior_to = frame.retire_prior_to;
            let to_retire: Vec<u64> = self
                .destination_cids
                .range(..frame.retire_prior_to)
                .filter(|(_, info)| info.status != ConnectionIdStatus::Retired)
                .map(|(seq, _)| *seq)
                .collect();
            for seq in to_retire {
                self.retire_destination_connection_id(seq);
            }
        }
        Ok(())
    }

    /// Retire the peer-issued CID at `seq` and tell the peer so.
    ///
    /// The RETIRE_CONNECTION_ID frame re-enqueues itself on loss;
    /// retirement is defined by sequence number, so the peer processes a
    /// duplicate idempotently.
    pub fn retire_destination_connection_id(&mut self, seq: u64) {
        if let Some(info) = self.destination_cids.get_mut(&seq) {
            info.status = ConnectionIdStatus::Retired;
        }
        self.send_retire_destination(seq);
    }

    fn send_retire_destination(&self, seq: u64) {
        send_resend_on_loss(
            &self.sender,
            Frame::RetireConnectionId(RetireConnectionIdFrame { sequence_number: seq }),
            EncryptionLevel::App,
        );
    }

    pub fn destination_connection_ids(&self) -> &BTreeMap<u64, ConnectionIdInfo> {
        &self.destination_cids
    }

    // ------------------------------------------------------------------
    // Source side
    // ------------------------------------------------------------------

    /// Issue `count` fresh source CIDs, announce each with a
    /// NEW_CONNECTION_ID frame carrying `retire_prior_to`, and return
    /// their values.
    pub fn new_connection_ids(&mut self, count: usize, retire_prior_to: u64) -> Vec<ConnectionId> {
        let mut issued = Vec::with_capacity(count);
        for _ in 0..count {
            issued.push(self.issue_source_cid(retire_prior_to));
        }
        issued
    }

    fn issue_source_cid(&mut self, retire_prior_to: u64) -> ConnectionId {
        let seq = self.next_source_sequence;
        self.next_source_sequence += 1;

        let cid = ConnectionId::random(self.cid_length);
        let mut token = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut token);

        self.source_cids.insert(
            seq,
            ConnectionIdInfo {
                sequence_number: seq,
                connection_id: cid.clone(),
                status: ConnectionIdStatus::New,
                stateless_reset_token: Some(token),
            },
        );

        send_resend_on_loss(
            &self.sender,
            Frame::NewConnectionId(NewConnectionIdFrame {
                sequence_number: seq,
                retire_prior_to,
                connection_id: cid.clone(),
                stateless_reset_token: token,
            }),
            EncryptionLevel::App,
        );
        cid
    }

    /// Register that a packet arrived on one of our CIDs.
    ///
    /// First use of a NEW CID promotes it to USED and, while the peer's
    /// active limit leaves room, triggers issuance of one replacement.
    pub fn register_used_cid(&mut self, cid: &[u8]) {
        let newly_used = match self
            .source_cids
            .values_mut()
            .find(|info| info.connection_id.as_bytes() == cid)
        {
            Some(info) if info.status == ConnectionIdStatus::New => {
                info.status = ConnectionIdStatus::Used;
                true
            }
            _ => false,
        };

        if newly_used && (self.active_source_cid_count() as u64) < self.peer_active_cid_limit {
            self.issue_source_cid(0);
        }
    }

    /// Handle a RETIRE_CONNECTION_ID frame from the peer.
    ///
    /// A sequence number never issued is a protocol violation. Retirement
    /// below the peer's active limit is answered with a replacement CID.
    pub fn process_retire_connection_id(&mut self, seq: u64) -> Result<()> {
        if seq >= self.next_source_sequence {
            return Err(Error::Transport(TransportError::ProtocolViolation));
        }
        if let Some(info) = self.source_cids.get_mut(&seq) {
            info.status = ConnectionIdStatus::Retired;
        }
        if (self.active_source_cid_count() as u64) < self.peer_active_cid_limit {
            self.issue_source_cid(0);
        }
        Ok(())
    }

    pub fn set_peer_active_cid_limit(&mut self, limit: u64) {
        self.peer_active_cid_limit = limit;
    }

    /// The source CID currently offered in our long headers.
    pub fn current_source_cid(&self) -> &ConnectionId {
        // Sequence 0 exists from construction and is replaced, never
        // removed.
        &self.source_cids[&0].connection_id
    }

    pub fn source_connection_ids(&self) -> &BTreeMap<u64, ConnectionIdInfo> {
        &self.source_cids
    }

    /// Source CIDs not yet retired.
    pub fn active_source_cid_count(&self) -> usize {
        self.source_cids
            .values()
            .filter(|info| info.status != ConnectionIdStatus::Retired)
            .count()
    }

    pub fn cid_length(&self) -> usize {
        self.cid_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send::RecordingSender;

    struct Fixture {
        manager: ConnectionIdManager,
        sender: Arc<RecordingSender>,
    }

    fn fixture() -> Fixture {
        let sender = RecordingSender::new();
        let manager = ConnectionIdManager::new(4, sender.clone());
        Fixture { manager, sender }
    }

    fn new_cid_frames(sender: &RecordingSender) -> Vec<NewConnectionIdFrame> {
        sender
            .sent_frames()
            .into_iter()
            .filter_map(|(frame, _)| match frame {
                Frame::NewConnectionId(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn retire_frames(sender: &RecordingSender) -> Vec<RetireConnectionIdFrame> {
        sender
            .sent_frames()
            .into_iter()
            .filter_map(|(frame, _)| match frame {
                Frame::RetireConnectionId(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn starts_with_one_used_source_cid_at_sequence_zero() {
        let fx = fixture();
        assert_eq!(fx.manager.active_source_cid_count(), 1);
        assert_eq!(fx.manager.source_connection_ids()[&0].status, ConnectionIdStatus::Used);
        assert_eq!(fx.manager.current_source_cid().len(), 4);
    }

    #[test]
    fn issues_cids_with_increasing_sequence_numbers() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(10);
        let issued = fx.manager.new_connection_ids(3, 0);
        assert_eq!(issued.len(), 3);

        let frames = new_cid_frames(&fx.sender);
        assert_eq!(
            frames.iter().map(|f| f.sequence_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(fx.manager.active_source_cid_count(), 4);
    }

    #[test]
    fn retiring_a_source_cid_issues_a_replacement() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(3);
        fx.manager.new_connection_ids(1, 0);
        assert_eq!(fx.manager.source_connection_ids().len(), 2);
        fx.sender.clear();

        fx.manager.process_retire_connection_id(0).unwrap();

        assert_eq!(fx.manager.active_source_cid_count(), 2);
        assert_eq!(
            fx.manager.source_connection_ids()[&0].status,
            ConnectionIdStatus::Retired
        );
        assert_eq!(new_cid_frames(&fx.sender).len(), 1);
    }

    #[test]
    fn retiring_an_unissued_sequence_is_a_protocol_violation() {
        let mut fx = fixture();
        assert_eq!(
            fx.manager.process_retire_connection_id(99),
            Err(Error::Transport(TransportError::ProtocolViolation))
        );
    }

    #[test]
    fn first_use_of_a_new_cid_issues_one_replacement() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(7);
        let unused = fx.manager.new_connection_ids(1, 0).remove(0);
        fx.sender.clear();

        fx.manager.register_used_cid(unused.as_bytes());

        assert_eq!(
            fx.manager.source_connection_ids()[&1].status,
            ConnectionIdStatus::Used
        );
        assert_eq!(new_cid_frames(&fx.sender).len(), 1);
    }

    #[test]
    fn no_replacement_when_the_peer_limit_is_saturated() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(1);
        let unused = fx.manager.new_connection_ids(1, 0).remove(0);
        fx.sender.clear();

        fx.manager.register_used_cid(unused.as_bytes());

        assert_eq!(fx.sender.sent_count(), 0);
    }

    #[test]
    fn reuse_of_a_used_cid_has_no_effect() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(8);
        let next = fx.manager.new_connection_ids(1, 0).remove(0);
        let first = fx.manager.current_source_cid().clone();
        fx.manager.register_used_cid(next.as_bytes());
        fx.sender.clear();

        fx.manager.register_used_cid(first.as_bytes());

        assert_eq!(fx.sender.sent_count(), 0);
    }

    #[test]
    fn new_connection_id_with_inverted_retire_threshold_is_a_violation() {
        let mut fx = fixture();
        let frame = NewConnectionIdFrame {
            sequence_number: 1,
            retire_prior_to: 2,
            connection_id: ConnectionId::from_slice(&[1, 2, 3, 4]).unwrap(),
            stateless_reset_token: [0; 16],
        };
        assert_eq!(
            fx.manager.process_new_connection_id(&frame),
            Err(Error::Transport(TransportError::ProtocolViolation))
        );
    }

    #[test]
    fn reordered_new_connection_id_below_threshold_is_retired_immediately() {
        let mut fx = fixture();
        fx.manager.set_original_destination_cid(ConnectionId::from_slice(&[9; 8]).unwrap());

        // Sequence 4 arrives first, retiring everything below 3.
        fx.manager
            .process_new_connection_id(&NewConnectionIdFrame {
                sequence_number: 4,
                retire_prior_to: 3,
                connection_id: ConnectionId::from_slice(&[4, 4, 4, 4]).unwrap(),
                stateless_reset_token: [0; 16],
            })
            .unwrap();
        fx.sender.clear();

        // Sequence 2 arrives late; it was retired before we ever saw it.
        fx.manager
            .process_new_connection_id(&NewConnectionIdFrame {
                sequence_number: 2,
                retire_prior_to: 0,
                connection_id: ConnectionId::from_slice(&[2, 2, 2, 2]).unwrap(),
                stateless_reset_token: [0; 16],
            })
            .unwrap();

        let retires = retire_frames(&fx.sender);
        assert_eq!(retires.len(), 1);
        assert_eq!(retires[0].sequence_number, 2);
        // It must not have been stored as usable either.
        assert!(!fx.manager.destination_connection_ids().contains_key(&2));
    }

    #[test]
    fn advancing_retire_prior_to_retires_older_destination_cids() {
        let mut fx = fixture();
        fx.manager.set_original_destination_cid(ConnectionId::from_slice(&[9; 8]).unwrap());

        fx.manager
            .process_new_connection_id(&NewConnectionIdFrame {
                sequence_number: 1,
                retire_prior_to: 1,
                connection_id: ConnectionId::from_slice(&[1, 1, 1, 1]).unwrap(),
                stateless_reset_token: [0; 16],
            })
            .unwrap();

        let retires = retire_frames(&fx.sender);
        assert_eq!(retires.len(), 1);
        assert_eq!(retires[0].sequence_number, 0);
        assert_eq!(
            fx.manager.destination_connection_ids()[&0].status,
            ConnectionIdStatus::Retired
        );
        // The new CID takes over as the current destination.
        assert_eq!(
            fx.manager.current_destination_cid().map(|c| c.as_bytes().to_vec()),
            Some(vec![1, 1, 1, 1])
        );
    }

    #[test]
    fn retire_destination_frame_is_retransmitted_when_lost() {
        let mut fx = fixture();
        fx.manager.set_original_destination_cid(ConnectionId::from_slice(&[9; 8]).unwrap());
        fx.manager
            .process_new_connection_id(&NewConnectionIdFrame {
                sequence_number: 1,
                retire_prior_to: 0,
                connection_id: ConnectionId::from_slice(&[1, 1, 1, 1]).unwrap(),
                stateless_reset_token: [0; 16],
            })
            .unwrap();

        fx.manager.retire_destination_connection_id(0);
        assert_eq!(retire_frames(&fx.sender).len(), 1);

        // Losing the packet re-enqueues the identical frame.
        fx.sender.invoke_lost_callback(0);
        let retires = retire_frames(&fx.sender);
        assert_eq!(retires.len(), 2);
        assert_eq!(retires[0], retires[1]);
    }

    #[test]
    fn cid_status_never_moves_backwards() {
        let mut fx = fixture();
        fx.manager.set_peer_active_cid_limit(8);
        let cid = fx.manager.new_connection_ids(1, 0).remove(0);
        fx.manager.register_used_cid(cid.as_bytes());
        fx.manager.process_retire_connection_id(1).unwrap();
        assert_eq!(
            fx.manager.source_connection_ids()[&1].status,
            ConnectionIdStatus::Retired
        );

        // Another packet on the retired CID must not resurrect it.
        fx.manager.register_used_cid(cid.as_bytes());
        assert_eq!(
            fx.manager.source_connection_ids()[&1].status,
            ConnectionIdStatus::Retired
        );
    }
}
