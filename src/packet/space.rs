//! Per-space packet state (RFC 9000 Sections 12.3, 13.1).
//!
//! Each of the three packet number spaces tracks its own outgoing packet
//! number, the packets received from the peer (for ACK generation) and the
//! packets sent to it (through the space's loss detector). Packet numbers
//! are monotone within a space and never shared across spaces.

use crate::frames::AckFrame;
use crate::recovery::{LossDetector, RttEstimator, SharedCongestionController};
use crate::types::{PacketNumber, PacketNumberSpace};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Upper bound on tracked received packet numbers, to bound memory.
const MAX_TRACKED_RECEIVED: usize = 1024;

/// State of one packet number space.
pub struct SpaceState {
    space: PacketNumberSpace,
    next_packet_number: PacketNumber,
    largest_received: Option<PacketNumber>,
    received: BTreeSet<PacketNumber>,
    ack_eliciting_received: usize,
    loss_detector: LossDetector,
}

impl SpaceState {
    pub fn new(
        space: PacketNumberSpace,
        congestion: SharedCongestionController,
        rtt: Arc<Mutex<RttEstimator>>,
    ) -> Self {
        Self {
            space,
            next_packet_number: 0,
            largest_received: None,
            received: BTreeSet::new(),
            ack_eliciting_received: 0,
            loss_detector: LossDetector::new(congestion, rtt),
        }
    }

    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    /// Allocate the next outgoing packet number. Numbers are handed out
    /// strictly increasing and never reused.
    pub fn next_packet_number(&mut self) -> PacketNumber {
        let pn = self.next_packet_number;
        self.next_packet_number += 1;
        pn
    }

    /// Record receipt of packet `pn`.
    pub fn on_packet_received(&mut self, pn: PacketNumber, ack_eliciting: bool) {
        self.received.insert(pn);
        while self.received.len() > MAX_TRACKED_RECEIVED {
            if let Some(&smallest) = self.received.iter().next() {
                self.received.remove(&smallest);
            }
        }
        if self.largest_received.map_or(true, |largest| pn > largest) {
            self.largest_received = Some(pn);
        }
        if ack_eliciting {
            self.ack_eliciting_received += 1;
        }
    }

    pub fn largest_received(&self) -> Option<PacketNumber> {
        self.largest_received
    }

    /// Whether an ACK frame is owed to the peer.
    pub fn ack_pending(&self) -> bool {
        self.ack_eliciting_received > 0
    }

    /// Build an ACK frame covering everything received, clearing the
    /// pending state. `None` when nothing has been received yet.
    pub fn build_ack_frame(&mut self) -> Option<AckFrame> {
        if self.received.is_empty() {
            return None;
        }
        let packet_numbers: Vec<PacketNumber> = self.received.iter().copied().collect();
        self.ack_eliciting_received = 0;
        Some(AckFrame::from_packet_numbers(&packet_numbers))
    }

    pub fn loss_detector(&self) -> &LossDetector {
        &self.loss_detector
    }

    pub fn loss_detector_mut(&mut self) -> &mut LossDetector {
        &mut self.loss_detector
    }

    /// Abandon the space: pending packets are discarded, receive state is
    /// dropped. Packet numbering stays monotone in case the space is still
    /// written to before keys are fully dropped.
    pub fn discard(&mut self) {
        self.loss_detector.reset();
        self.received.clear();
        self.largest_received = None;
        self.ack_eliciting_received = 0;
    }
}

/// The three packet number spaces of one connection, sharing a congestion
/// controller and RTT estimator.
pub struct PacketNumberSpaceManager {
    initial: SpaceState,
    handshake: SpaceState,
    application: SpaceState,
}

impl PacketNumberSpaceManager {
    pub fn new(congestion: SharedCongestionController, rtt: Arc<Mutex<RttEstimator>>) -> Self {
        Self {
            initial: SpaceState::new(
                PacketNumberSpace::Initial,
                congestion.clone(),
                rtt.clone(),
            ),
            handshake: SpaceState::new(
                PacketNumberSpace::Handshake,
                congestion.clone(),
                rtt.clone(),
            ),
            application: SpaceState::new(PacketNumberSpace::Application, congestion, rtt),
        }
    }

    pub fn get(&self, space: PacketNumberSpace) -> &SpaceState {
        match space {
            PacketNumberSpace::Initial => &self.initial,
            PacketNumberSpace::Handshake => &self.handshake,
            PacketNumberSpace::Application => &self.application,
        }
    }

    pub fn get_mut(&mut self, space: PacketNumberSpace) -> &mut SpaceState {
        match space {
            PacketNumberSpace::Initial => &mut self.initial,
            PacketNumberSpace::Handshake => &mut self.handshake,
            PacketNumberSpace::Application => &mut self.application,
        }
    }

    /// Earliest loss-time deadline across all spaces.
    pub fn earliest_loss_time(&self) -> Option<std::time::Instant> {
        [&self.initial, &self.handshake, &self.application]
            .into_iter()
            .filter_map(|s| s.loss_detector().loss_time())
            .min()
    }
}
