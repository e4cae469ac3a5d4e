//! Loss detection and congestion control (RFC 9002).
//!
//! Each packet number space owns a [`LossDetector`]; all three share one
//! [`CongestionController`] and one [`RttEstimator`] for the connection.

mod congestion;
mod loss;
mod rtt;

pub use congestion::{
    CongestionController, FixedWindowCongestionController, NewRenoCongestionController,
    SharedCongestionController, INITIAL_WINDOW, MAX_DATAGRAM_SIZE, MINIMUM_WINDOW,
};
pub use loss::{LossDetector, LostPacketCallback};
pub use rtt::RttEstimator;

use crate::frames::Frame;
use crate::types::PacketNumber;
use std::time::Instant;

/// Record of a packet handed to the sender, kept until it is acknowledged
/// or declared lost.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub packet_number: PacketNumber,
    /// Size on the wire in bytes, header and AEAD overhead included.
    pub size: usize,
    pub time_sent: Instant,
    pub frames: Vec<Frame>,
}

impl SentPacket {
    pub fn new(
        packet_number: PacketNumber,
        size: usize,
        time_sent: Instant,
        frames: Vec<Frame>,
    ) -> Self {
        Self { packet_number, size, time_sent, frames }
    }

    /// The packet must be acknowledged by the peer (RFC 9002 Section 2).
    pub fn is_ack_eliciting(&self) -> bool {
        self.frames.iter().any(Frame::is_ack_eliciting)
    }

    /// The packet carries nothing but ACK frames.
    pub fn is_ack_only(&self) -> bool {
        !self.frames.is_empty() && self.frames.iter().all(|f| matches!(f, Frame::Ack(_)))
    }

    /// Whether the packet counts toward bytes in flight: ack-eliciting
    /// frames or PADDING do, a bare CONNECTION_CLOSE does not
    /// (RFC 9002 Section 2).
    pub fn counts_in_flight(&self) -> bool {
        self.frames
            .iter()
            .any(|f| f.is_ack_eliciting() || matches!(f, Frame::Padding { .. }))
    }
}
