//! Loss detection for one packet number space (RFC 9002 Section 6).
//!
//! Every sent packet is tracked until an ACK covers it or it is declared
//! lost, and each packet reaches at most one of those outcomes. Two rules
//! declare loss, both gated on the packet being older than the largest
//! acknowledged one:
//!
//! - packet threshold: sent at least `PACKET_THRESHOLD` packets before the
//!   largest acknowledged;
//! - time threshold: older than `9/8 x max(smoothed_rtt, latest_rtt)`.
//!
//! A packet past the packet threshold but not yet the time threshold sets
//! `loss_time`, the deadline at which [`LossDetector::detect_lost_packets`]
//! must run again.

use super::congestion::SharedCongestionController;
use super::rtt::RttEstimator;
use super::SentPacket;
use crate::frames::AckFrame;
use crate::types::PacketNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reordering threshold in packets (RFC 9002 Section 6.1.1).
const PACKET_THRESHOLD: u64 = 3;

/// Time threshold numerator/denominator: 9/8 (RFC 9002 Section 6.1.2).
const TIME_THRESHOLD_NUM: u32 = 9;
const TIME_THRESHOLD_DEN: u32 = 8;

/// Timer granularity floor for the loss delay (RFC 9002 Section 6.1.2).
const GRANULARITY: Duration = Duration::from_millis(1);

/// Invoked exactly once when the carrying packet is declared lost, so the
/// owning component can re-enqueue its retransmittable frames.
pub type LostPacketCallback = Box<dyn FnOnce(SentPacket) + Send>;

struct PacketStatus {
    packet: SentPacket,
    lost_callback: LostPacketCallback,
}

/// Loss detector for a single packet number space.
pub struct LossDetector {
    sent_log: BTreeMap<PacketNumber, PacketStatus>,
    largest_acked: Option<PacketNumber>,
    loss_time: Option<Instant>,
    ack_eliciting_in_flight: usize,
    ack_received: bool,
    congestion: SharedCongestionController,
    rtt: Arc<Mutex<RttEstimator>>,
}

impl LossDetector {
    pub fn new(congestion: SharedCongestionController, rtt: Arc<Mutex<RttEstimator>>) -> Self {
        Self {
            sent_log: BTreeMap::new(),
            largest_acked: None,
            loss_time: None,
            ack_eliciting_in_flight: 0,
            ack_received: false,
            congestion,
            rtt,
        }
    }

    /// Track a packet handed to the network.
    ///
    /// Packets that count toward bytes in flight are registered with the
    /// congestion controller; ack-only packets are tracked solely for ack
    /// correlation.
    pub fn packet_sent(&mut self, packet: SentPacket, lost_callback: LostPacketCallback) {
        if packet.counts_in_flight() {
            self.congestion.lock().register_in_flight(&packet);
        }
        if packet.is_ack_eliciting() {
            self.ack_eliciting_in_flight += 1;
        }
        self.sent_log
            .insert(packet.packet_number, PacketStatus { packet, lost_callback });
    }

    /// Process one received ACK frame.
    ///
    /// `ack_delay` is the peer's reported delay, already scaled by its
    /// `ack_delay_exponent`. The congestion controller's `register_acked`
    /// runs exactly once per call, with whatever in-flight packets the ACK
    /// newly covered. Returns the newly acknowledged and the newly lost
    /// packet numbers.
    pub fn on_ack_received(
        &mut self,
        ack: &AckFrame,
        ack_delay: Duration,
        now: Instant,
    ) -> (Vec<PacketNumber>, Vec<PacketNumber>) {
        self.ack_received = true;
        self.largest_acked = Some(match self.largest_acked {
            Some(largest) => largest.max(ack.largest_acknowledged),
            None => ack.largest_acknowledged,
        });

        let newly_acked: Vec<PacketNumber> = self
            .sent_log
            .keys()
            .copied()
            .filter(|pn| ack.acknowledges(*pn))
            .collect();

        let mut acked_packets = Vec::with_capacity(newly_acked.len());
        for pn in &newly_acked {
            if let Some(status) = self.sent_log.remove(pn) {
                if status.packet.is_ack_eliciting() {
                    self.ack_eliciting_in_flight -= 1;
                }
                acked_packets.push(status.packet);
            }
        }

        // RTT sample only when the largest acknowledged packet is news.
        if let Some(largest) = acked_packets
            .iter()
            .find(|p| p.packet_number == ack.largest_acknowledged)
        {
            let sample = now.saturating_duration_since(largest.time_sent);
            self.rtt.lock().update_with_ack_delay(sample, ack_delay);
        }

        let in_flight: Vec<SentPacket> = acked_packets
            .iter()
            .filter(|p| p.counts_in_flight())
            .cloned()
            .collect();
        self.congestion.lock().register_acked(&in_flight);

        let lost = self.detect_lost_packets(now);
        (newly_acked, lost)
    }

    /// Declare packets lost per the packet and time thresholds, and refresh
    /// `loss_time`. Also the re-entry point when the `loss_time` deadline
    /// fires. Returns the packet numbers declared lost.
    pub fn detect_lost_packets(&mut self, now: Instant) -> Vec<PacketNumber> {
        let largest_acked = match self.largest_acked {
            Some(largest) => largest,
            None => return Vec::new(),
        };
        let loss_delay = self.loss_delay();

        let mut lost_numbers = Vec::new();
        let mut earliest_pending_sent: Option<Instant> = None;
        for (pn, status) in &self.sent_log {
            // Nothing newer than the largest acknowledged packet can be
            // lost, and a packet carrying only ACKs never is.
            if *pn > largest_acked || status.packet.is_ack_only() {
                continue;
            }
            let pn_lost = *pn + PACKET_THRESHOLD <= largest_acked;
            let time_lost = status.packet.time_sent + loss_delay <= now;
            if pn_lost || time_lost {
                lost_numbers.push(*pn);
            } else {
                earliest_pending_sent = Some(match earliest_pending_sent {
                    Some(t) if t <= status.packet.time_sent => t,
                    _ => status.packet.time_sent,
                });
            }
        }

        self.loss_time = earliest_pending_sent.map(|sent| sent + loss_delay);

        if lost_numbers.is_empty() {
            return lost_numbers;
        }

        let mut lost_records = Vec::with_capacity(lost_numbers.len());
        for pn in &lost_numbers {
            if let Some(status) = self.sent_log.remove(pn) {
                if status.packet.is_ack_eliciting() {
                    self.ack_eliciting_in_flight -= 1;
                }
                lost_records.push(status);
            }
        }

        let in_flight: Vec<SentPacket> = lost_records
            .iter()
            .filter(|s| s.packet.counts_in_flight())
            .map(|s| s.packet.clone())
            .collect();
        self.congestion.lock().register_lost(&in_flight);

        for status in lost_records {
            tracing::debug!(pn = status.packet.packet_number, "packet declared lost");
            (status.lost_callback)(status.packet);
        }

        lost_numbers
    }

    /// Drop every pending packet without declaring it acked or lost.
    ///
    /// Used when a packet number space is abandoned (handshake keys
    /// discarded, connection torn down). The congestion controller's
    /// `discard` runs exactly once to release the byte accounting of
    /// whatever was still in flight.
    pub fn reset(&mut self) {
        let remaining: Vec<SentPacket> = core::mem::take(&mut self.sent_log)
            .into_values()
            .filter(|s| s.packet.counts_in_flight())
            .map(|s| s.packet)
            .collect();
        self.congestion.lock().discard(&remaining);

        self.largest_acked = None;
        self.loss_time = None;
        self.ack_eliciting_in_flight = 0;
        self.ack_received = false;
    }

    /// Ack-eliciting packets not yet acknowledged or lost.
    pub fn unacked(&self) -> Vec<&SentPacket> {
        self.sent_log
            .values()
            .filter(|s| s.packet.is_ack_eliciting())
            .map(|s| &s.packet)
            .collect()
    }

    /// Whether any ack-eliciting packet is still outstanding.
    pub fn ack_eliciting_in_flight(&self) -> bool {
        self.ack_eliciting_in_flight > 0
    }

    /// True until the first ACK frame is processed (or again after
    /// [`reset`](Self::reset)).
    pub fn no_ack_received(&self) -> bool {
        !self.ack_received
    }

    /// Deadline at which [`detect_lost_packets`](Self::detect_lost_packets)
    /// must run next, if any packet is waiting on the time threshold.
    pub fn loss_time(&self) -> Option<Instant> {
        self.loss_time
    }

    fn loss_delay(&self) -> Duration {
        let rtt = self.rtt.lock();
        let base = core::cmp::max(rtt.smoothed_rtt(), rtt.latest_rtt());
        core::cmp::max(base * TIME_THRESHOLD_NUM / TIME_THRESHOLD_DEN, GRANULARITY)
    }
}
