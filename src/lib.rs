//! # quicc: client-side QUIC connection engine
//!
//! The connection engine at the heart of a QUIC client (RFC 8999, 9000,
//! 9001, 9002 and RFC 9369 for v2): the handshake-driven state machine,
//! packet and frame codecs, per-space loss detection, congestion control,
//! flow control and the connection-ID lifecycle.
//!
//! ## What lives here, what does not
//!
//! The engine is a **pure state machine**: it consumes datagrams and time,
//! mutates connection state and pushes frames through the
//! [`send::Sender`] façade. The TLS stack, UDP sockets and stream data
//! buffers stay behind trait seams ([`tls::TlsEngine`],
//! [`packet::PacketProtection`], [`send::Sender`]) — this crate decides
//! *what* the connection does, collaborators decide how bytes get keyed
//! and moved.
//!
//! ```text
//! quicc/
//! ├── error          - typed transport and engine errors
//! ├── types          - connection IDs, stream IDs, varints, levels
//! ├── version        - version registry (draft-17..34, v1, v2)
//! ├── frames         - frame model and codec (RFC 9000 §19)
//! ├── packet         - header parse, demux, retry tag, spaces
//! ├── recovery       - RTT, loss detection, congestion control (RFC 9002)
//! ├── flow_control   - send credit and receive-window updates
//! ├── transport      - transport parameters (RFC 9000 §18)
//! ├── connection     - client state machine + CID manager
//! ├── send           - sender façade trait and queue hand-off
//! ├── tls            - TLS engine interface
//! └── qlog           - qlog draft-02 event sink
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use quicc::connection::QuicClientConnection;
//! use std::time::{Duration, Instant};
//!
//! let mut connection = QuicClientConnection::builder()
//!     .uri("//example.com:443")
//!     .connection_id_length(4)
//!     .build()
//!     .expect("valid configuration");
//! connection.connect(Duration::from_secs(5), "h3", Instant::now())
//!     .expect("connect initiated");
//! ```

#![forbid(unsafe_code)]

pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod packet;
pub mod qlog;
pub mod recovery;
pub mod send;
pub mod tls;
pub mod transport;
pub mod types;
pub mod version;

pub use connection::{ConnectionStatus, QuicClientConnection, QuicStream};
pub use error::{Error, Result, TransportError};
pub use frames::Frame;
pub use types::{ConnectionId, EncryptionLevel, PacketNumber, PacketNumberSpace, StreamId};
pub use version::Version;
