//! # tether-core
//!
//! Reliable, resumable message sessions on top of a lossy message transport
//! such as a WebSocket.
//!
//! This crate contains the whole protocol engine and no I/O: the binary frame
//! codec, the per-connection state machine, acknowledgment and replay, the
//! session registry, and ping-based liveness.  A transport adapter (see the
//! `tether-server` crate) feeds it socket events and provides a
//! [`domain::transport::Transport`] to send through.
//!
//! # Architecture overview (for beginners)
//!
//! A client and a server exchange discrete messages.  Every DATA frame carries
//! an id and is acknowledged by the receiver; until then the sender keeps a
//! copy.  If the socket drops, the server keeps the session around for a
//! reconnect window.  A client that comes back on a new socket and presents
//! its old session id gets every unacknowledged frame replayed, once, in one
//! BATCH.  Receivers remember which ids they already processed, so a replay
//! never delivers a message twice.
//!
//! - **`protocol`** – Bytes on the wire.  Frames (ACK, DATA, RESPONSE, BATCH),
//!   the varint codec, JSON control messages, and the optional payload
//!   serializer.
//!
//! - **`domain`** – The session model: connections, routing, liveness, the
//!   registry, and the traits that connect it to sockets and applications.
//!
//! - **`application`** – The [`Engine`] adapters call into.

pub mod application;
pub mod domain;
pub mod protocol;

pub use application::{Disposition, Engine, SessionHandle};
pub use domain::close::{CloseCode, CloseInitiator, CloseReason};
pub use domain::config::{ConfigError, EngineConfig};
pub use domain::connection::{Connection, ConnectionState, SendError, SharedConnection};
pub use domain::handler::{ConnectionHandler, IncomingMessage, ReplyHandler};
pub use domain::identity::{IdGenerator, UuidIdGenerator};
pub use domain::transport::{Inbound, OutboundMessage, Transport, TransportError};
pub use protocol::{decode_frame, encode_frame, ControlMessage, Frame, FrameError, TrackedKind};
