//! Send- and receive-side flow control (RFC 9000 Section 4).
//!
//! Sending is bounded by two ceilings: the per-stream limit (from
//! `initial_max_stream_data_*`, raised by MAX_STREAM_DATA) and the
//! connection-wide limit (from `initial_max_data`, raised by MAX_DATA).
//! On the receive side, consumed bytes are accumulated and a MAX_DATA
//! update becomes due each time a full window increment has been eaten.

use crate::transport::TransportParameters;
use crate::types::StreamId;
use std::collections::HashMap;

/// Send-side credit accounting, initialized from the peer's transport
/// parameters.
#[derive(Debug)]
pub struct FlowController {
    /// Connection-wide ceiling (latest MAX_DATA).
    connection_limit: u64,
    /// Credit already handed out across all streams.
    connection_assigned: u64,
    /// Per-stream ceilings once raised beyond their defaults.
    stream_limits: HashMap<StreamId, u64>,
    /// Per-stream credit already handed out.
    stream_assigned: HashMap<StreamId, u64>,
    initial_max_stream_data_bidi_remote: u64,
    initial_max_stream_data_bidi_local: u64,
    initial_max_stream_data_uni: u64,
}

impl FlowController {
    pub fn new(peer_parameters: &TransportParameters) -> Self {
        Self {
            connection_limit: peer_parameters.initial_max_data,
            connection_assigned: 0,
            stream_limits: HashMap::new(),
            stream_assigned: HashMap::new(),
            initial_max_stream_data_bidi_remote: peer_parameters
                .initial_max_stream_data_bidi_remote,
            initial_max_stream_data_bidi_local: peer_parameters
                .initial_max_stream_data_bidi_local,
            initial_max_stream_data_uni: peer_parameters.initial_max_stream_data_uni,
        }
    }

    /// Grow the credit assigned to `stream_id` toward `desired`.
    ///
    /// Returns the stream's assigned limit afterwards: the minimum of
    /// `desired`, the stream's ceiling and what connection-level credit
    /// remains.
    pub fn increase_flow_control_limit(&mut self, stream_id: StreamId, desired: u64) -> u64 {
        let ceiling = self.stream_ceiling(stream_id);
        let assigned = self.stream_assigned.get(&stream_id).copied().unwrap_or(0);

        let target = desired.min(ceiling);
        if target <= assigned {
            return assigned;
        }

        let mut increase = target - assigned;
        let connection_remaining = self.connection_limit - self.connection_assigned;
        increase = increase.min(connection_remaining);

        let new_assigned = assigned + increase;
        self.connection_assigned += increase;
        self.stream_assigned.insert(stream_id, new_assigned);
        new_assigned
    }

    /// Apply a MAX_DATA frame; values at or below the current ceiling are
    /// ignored.
    pub fn update_connection_limit(&mut self, maximum_data: u64) {
        if maximum_data > self.connection_limit {
            self.connection_limit = maximum_data;
        }
    }

    /// Apply a MAX_STREAM_DATA frame; regressions are ignored.
    pub fn update_stream_limit(&mut self, stream_id: StreamId, maximum_stream_data: u64) {
        let current = self.stream_ceiling(stream_id);
        if maximum_stream_data > current {
            self.stream_limits.insert(stream_id, maximum_stream_data);
        }
    }

    /// Connection-level ceiling currently in force.
    pub fn connection_limit(&self) -> u64 {
        self.connection_limit
    }

    fn stream_ceiling(&self, stream_id: StreamId) -> u64 {
        if let Some(&limit) = self.stream_limits.get(&stream_id) {
            return limit;
        }
        if stream_id.is_unidirectional() {
            self.initial_max_stream_data_uni
        } else if stream_id.is_client_initiated() {
            // We opened it, so the peer's "remote" limit governs our sends.
            self.initial_max_stream_data_bidi_remote
        } else {
            self.initial_max_stream_data_bidi_local
        }
    }
}

/// Receive-side connection window: tracks what the application consumed and
/// decides when a MAX_DATA update is owed to the peer.
#[derive(Debug)]
pub struct ConnectionReceiveWindow {
    /// Window size advertised in our transport parameters.
    window: u64,
    /// Emission threshold; one MAX_DATA per increment consumed.
    increment: u64,
    consumed: u64,
    /// Consumption level at which the last update was emitted.
    last_update_at: u64,
}

impl ConnectionReceiveWindow {
    pub fn new(window: u64) -> Self {
        Self { window, increment: window / 10, consumed: 0, last_update_at: 0 }
    }

    /// The distance between successive MAX_DATA updates.
    pub fn increment(&self) -> u64 {
        self.increment
    }

    /// Record `delta` consumed bytes. Returns the new MAX_DATA value to
    /// advertise when cumulative unadvertised consumption reaches one
    /// increment, `None` otherwise.
    pub fn on_consumed(&mut self, delta: u64) -> Option<u64> {
        self.consumed += delta;
        if self.consumed - self.last_update_at >= self.increment {
            self.last_update_at = self.consumed;
            Some(self.consumed + self.window)
        } else {
            None
        }
    }
}
