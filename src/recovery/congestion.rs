//! Congestion control (RFC 9002 Section 7, Appendix B).
//!
//! The controller is shared by the three packet number spaces' loss
//! detectors and is readable through the sender façade, hence the
//! `Arc<Mutex<_>>` alias; all writes happen on the connection task.

use super::SentPacket;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Maximum datagram size assumed for window arithmetic
/// (RFC 9000 Section 14.1).
pub const MAX_DATAGRAM_SIZE: u64 = 1200;

/// Initial congestion window: 10 datagrams, capped at 14720 bytes
/// (RFC 9002 Section 7.2).
pub const INITIAL_WINDOW: u64 = if 10 * MAX_DATAGRAM_SIZE < 14720 {
    10 * MAX_DATAGRAM_SIZE
} else {
    14720
};

/// Floor for the congestion window after loss (RFC 9002 Section 7.2).
pub const MINIMUM_WINDOW: u64 = 2 * MAX_DATAGRAM_SIZE;

/// Bounds the bytes a connection may have in flight.
///
/// Only packets that count toward bytes in flight are passed in; the loss
/// detector filters out ack-only and CONNECTION_CLOSE-only packets before
/// calling any of the register methods.
pub trait CongestionController: Send {
    /// A tracked packet left through the sender.
    fn register_in_flight(&mut self, packet: &SentPacket);

    /// Packets newly acknowledged by one ACK frame. Called exactly once per
    /// processed ACK, with an empty slice when the ACK acknowledged nothing
    /// in flight.
    fn register_acked(&mut self, packets: &[SentPacket]);

    /// Packets declared lost; triggers a congestion event.
    fn register_lost(&mut self, packets: &[SentPacket]);

    /// Packets dropped without ack or loss (space reset); releases their
    /// byte accounting without reacting to congestion.
    fn discard(&mut self, packets: &[SentPacket]);

    /// Whether `bytes` more may enter the network.
    fn can_send(&self, bytes: usize) -> bool;

    fn congestion_window(&self) -> u64;

    fn bytes_in_flight(&self) -> u64;
}

/// Shared handle to the connection's congestion controller.
pub type SharedCongestionController = Arc<Mutex<dyn CongestionController>>;

/// NewReno congestion control (RFC 9002 Appendix B).
///
/// Slow start until `ssthresh`, then congestion avoidance; loss halves the
/// window and opens a recovery period anchored at `recovery_start_time`,
/// during which further losses of earlier packets do not reduce the window
/// again.
#[derive(Debug)]
pub struct NewRenoCongestionController {
    congestion_window: u64,
    bytes_in_flight: u64,
    slow_start_threshold: u64,
    recovery_start_time: Option<Instant>,
    max_datagram_size: u64,
}

impl NewRenoCongestionController {
    pub fn new() -> Self {
        Self::with_initial_window(INITIAL_WINDOW)
    }

    /// Controller with an explicit starting window; the seam tests use
    /// instead of reaching into private state.
    pub fn with_initial_window(window: u64) -> Self {
        Self {
            congestion_window: window,
            bytes_in_flight: 0,
            slow_start_threshold: u64::MAX,
            recovery_start_time: None,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.congestion_window < self.slow_start_threshold
    }

    fn sent_during_recovery(&self, time_sent: Instant) -> bool {
        matches!(self.recovery_start_time, Some(start) if time_sent <= start)
    }

    fn on_congestion_event(&mut self, largest_lost_sent: Instant) {
        // Losses of packets sent before the current recovery period began
        // belong to the same event.
        if self.sent_during_recovery(largest_lost_sent) {
            return;
        }
        self.recovery_start_time = Some(Instant::now());
        self.slow_start_threshold =
            core::cmp::max(self.congestion_window / 2, MINIMUM_WINDOW);
        self.congestion_window = self.slow_start_threshold;
        tracing::debug!(
            cwnd = self.congestion_window,
            ssthresh = self.slow_start_threshold,
            "congestion event, window reduced"
        );
    }
}

impl Default for NewRenoCongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController for NewRenoCongestionController {
    fn register_in_flight(&mut self, packet: &SentPacket) {
        self.bytes_in_flight += packet.size as u64;
    }

    fn register_acked(&mut self, packets: &[SentPacket]) {
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);

            // No window growth for packets sent while recovering.
            if self.sent_during_recovery(packet.time_sent) {
                continue;
            }
            let acked = packet.size as u64;
            if self.in_slow_start() {
                self.congestion_window += acked;
            } else {
                self.congestion_window +=
                    self.max_datagram_size * acked / self.congestion_window;
            }
        }
    }

    fn register_lost(&mut self, packets: &[SentPacket]) {
        let mut latest_sent: Option<Instant> = None;
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);
            latest_sent = Some(match latest_sent {
                Some(t) if t >= packet.time_sent => t,
                _ => packet.time_sent,
            });
        }
        if let Some(latest) = latest_sent {
            self.on_congestion_event(latest);
        }
    }

    fn discard(&mut self, packets: &[SentPacket]) {
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);
        }
    }

    fn can_send(&self, bytes: usize) -> bool {
        self.bytes_in_flight + bytes as u64 <= self.congestion_window
    }

    fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }
}

/// Constant-window controller for tests: byte accounting without any
/// reaction to acks or losses.
#[derive(Debug)]
pub struct FixedWindowCongestionController {
    window: u64,
    bytes_in_flight: u64,
}

impl FixedWindowCongestionController {
    pub fn new(window: u64) -> Self {
        Self { window, bytes_in_flight: 0 }
    }
}

impl CongestionController for FixedWindowCongestionController {
    fn register_in_flight(&mut self, packet: &SentPacket) {
        self.bytes_in_flight += packet.size as u64;
    }

    fn register_acked(&mut self, packets: &[SentPacket]) {
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);
        }
    }

    fn register_lost(&mut self, packets: &[SentPacket]) {
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);
        }
    }

    fn discard(&mut self, packets: &[SentPacket]) {
        for packet in packets {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(packet.size as u64);
        }
    }

    fn can_send(&self, bytes: usize) -> bool {
        self.bytes_in_flight + bytes as u64 <= self.window
    }

    fn congestion_window(&self) -> u64 {
        self.window
    }

    fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }
}
