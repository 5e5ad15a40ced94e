//! The transport seam between the protocol engine and a real socket.
//!
//! The engine never performs I/O itself.  It pushes outgoing messages into a
//! [`Transport`] and is told about incoming ones through the application
//! layer.  The WebSocket adapter in `tether-server` implements this trait;
//! unit and integration tests use [`mock::MockTransport`].
//!
//! # Contract
//!
//! - `send` must not block.  Implementations queue the message and report the
//!   queued size through `buffered_amount` until it is written.
//! - `buffered_amount` drives backpressure: at or above the configured
//!   threshold the connection stops sending and queues frames instead.
//! - `close` starts closing the socket.  It is called at most once per
//!   transport by the engine but must tolerate an already-dead socket.

use thiserror::Error;

pub mod mock;

/// A message handed to the transport for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// An encoded frame.
    Binary(Vec<u8>),
    /// A JSON control message.
    Text(String),
}

impl OutboundMessage {
    /// Size in bytes that this message adds to the transport buffer.
    pub fn len(&self) -> usize {
        match self {
            OutboundMessage::Binary(bytes) => bytes.len(),
            OutboundMessage::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Binary(Vec<u8>),
    Text(String),
}

/// Error type for transport sends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

/// Outgoing half of a socket, as seen by a connection.
pub trait Transport: Send {
    /// Queues `message` for sending.
    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Bytes queued but not yet written to the socket.
    fn buffered_amount(&self) -> usize;

    /// Starts closing the socket with a close code and a short reason.
    fn close(&mut self, code: u16, reason: &str);
}
