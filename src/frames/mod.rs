//! QUIC frame model and codec (RFC 9000 Section 12.4, 19).

mod parse;
mod types;

pub use types::{
    AckFrame, AckRange, ConnectionCloseFrame, CryptoFrame, DataBlockedFrame, EcnCounts, Frame,
    MaxDataFrame, MaxStreamDataFrame, MaxStreamsFrame, NewConnectionIdFrame, NewTokenFrame,
    PathChallengeFrame, PathResponseFrame, ResetStreamFrame, RetireConnectionIdFrame,
    StopSendingFrame, StreamDataBlockedFrame, StreamFrame, StreamsBlockedFrame,
};
