//! Credit-based flow control (RFC 9000 Section 4).

mod controller;

pub use controller::{ConnectionReceiveWindow, FlowController};
