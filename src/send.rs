//! The sender façade.
//!
//! The connection never writes datagrams itself; it enqueues frames at an
//! encryption level through this trait and the sender task coalesces them
//! into packets, registers them with the right loss detector and pushes
//! them to the socket. Hand-off is by message queue, so the sender may run
//! on its own task without sharing mutable state with the connection.

use crate::frames::Frame;
use crate::recovery::SharedCongestionController;
use crate::types::EncryptionLevel;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender as ChannelSender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Invoked with the frame when the packet that carried it is declared
/// lost, so the owner can re-enqueue it.
pub type FrameLostCallback = Box<dyn FnOnce(Frame) + Send>;

/// Frame egress interface consumed by the connection.
pub trait Sender: Send + Sync {
    /// Enqueue `frame` at `level`; `on_lost` fires if the carrying packet
    /// is declared lost.
    fn send(&self, frame: Frame, level: EncryptionLevel, on_lost: FrameLostCallback);

    /// Enqueue without retransmission bookkeeping. Used for frames that
    /// must not come back, such as CONNECTION_CLOSE.
    fn send_untracked(&self, frame: Frame, level: EncryptionLevel);

    /// Stamp the retry token onto every subsequent Initial packet.
    fn set_initial_token(&self, token: Bytes);

    /// Read access to the congestion controller bounding this sender.
    fn congestion_controller(&self) -> SharedCongestionController;
}

/// Enqueue `frame` with a lost-callback that re-enqueues it verbatim, over
/// and over, until some incarnation of it is acknowledged.
pub(crate) fn send_resend_on_loss(sender: &Arc<dyn Sender>, frame: Frame, level: EncryptionLevel) {
    let again = Arc::clone(sender);
    sender.send(
        frame,
        level,
        Box::new(move |lost| send_resend_on_loss(&again, lost, level)),
    );
}

/// One queued instruction for the sender task.
pub enum SenderCommand {
    /// Pack this frame into the next packet at the given level.
    Enqueue {
        frame: Frame,
        level: EncryptionLevel,
        on_lost: Option<FrameLostCallback>,
    },
    /// Carry this token on subsequent Initial packets.
    SetInitialToken(Bytes),
}

/// Channel-backed [`Sender`]: commands cross to the sender task through an
/// unbounded crossbeam queue.
pub struct QueuedSender {
    queue: ChannelSender<SenderCommand>,
    congestion: SharedCongestionController,
}

impl QueuedSender {
    /// Create the sender handle and the queue its task drains.
    pub fn new(congestion: SharedCongestionController) -> (Self, Receiver<SenderCommand>) {
        let (tx, rx) = unbounded();
        (Self { queue: tx, congestion }, rx)
    }
}

impl Sender for QueuedSender {
    fn send(&self, frame: Frame, level: EncryptionLevel, on_lost: FrameLostCallback) {
        // A closed queue means the sender task is gone; the connection is
        // shutting down anyway, so the frame is dropped.
        let _ = self.queue.send(SenderCommand::Enqueue { frame, level, on_lost: Some(on_lost) });
    }

    fn send_untracked(&self, frame: Frame, level: EncryptionLevel) {
        let _ = self.queue.send(SenderCommand::Enqueue { frame, level, on_lost: None });
    }

    fn set_initial_token(&self, token: Bytes) {
        let _ = self.queue.send(SenderCommand::SetInitialToken(token));
    }

    fn congestion_controller(&self) -> SharedCongestionController {
        self.congestion.clone()
    }
}

/// Recording [`Sender`] double for tests: every call is captured and lost
/// callbacks can be fired by hand.
#[derive(Default)]
pub struct RecordingSender {
    state: Mutex<RecordingSenderState>,
    congestion: Mutex<Option<SharedCongestionController>>,
}

#[derive(Default)]
struct RecordingSenderState {
    sent: Vec<(Frame, EncryptionLevel)>,
    callbacks: Vec<Option<FrameLostCallback>>,
    tokens: Vec<Bytes>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_congestion_controller(congestion: SharedCongestionController) -> Arc<Self> {
        let sender = Self::default();
        *sender.congestion.lock() = Some(congestion);
        Arc::new(sender)
    }

    /// Frames sent so far, tracked and untracked alike.
    pub fn sent_frames(&self) -> Vec<(Frame, EncryptionLevel)> {
        self.state.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// Tokens passed through `set_initial_token`.
    pub fn initial_tokens(&self) -> Vec<Bytes> {
        self.state.lock().tokens.clone()
    }

    /// Forget everything recorded so far. Registered lost callbacks are
    /// dropped as well.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.sent.clear();
        state.callbacks.clear();
        state.tokens.clear();
    }

    /// Fire the lost callback registered for send number `index` with the
    /// frame that was sent, simulating loss of the carrying packet.
    pub fn invoke_lost_callback(&self, index: usize) {
        let (frame, callback) = {
            let mut state = self.state.lock();
            let frame = state.sent[index].0.clone();
            (frame, state.callbacks[index].take())
        };
        if let Some(callback) = callback {
            callback(frame);
        }
    }

    /// Whether send number `index` carried retransmission bookkeeping.
    pub fn was_tracked(&self, index: usize) -> bool {
        self.state.lock().callbacks[index].is_some()
    }
}

impl Sender for RecordingSender {
    fn send(&self, frame: Frame, level: EncryptionLevel, on_lost: FrameLostCallback) {
        let mut state = self.state.lock();
        state.sent.push((frame, level));
        state.callbacks.push(Some(on_lost));
    }

    fn send_untracked(&self, frame: Frame, level: EncryptionLevel) {
        let mut state = self.state.lock();
        state.sent.push((frame, level));
        state.callbacks.push(None);
    }

    fn set_initial_token(&self, token: Bytes) {
        self.state.lock().tokens.push(token);
    }

    fn congestion_controller(&self) -> SharedCongestionController {
        if let Some(congestion) = self.congestion.lock().clone() {
            return congestion;
        }
        Arc::new(Mutex::new(crate::recovery::NewRenoCongestionController::new()))
    }
}
