//! Application callbacks.
//!
//! Every connection is created with one [`ConnectionHandler`].  The engine
//! calls it synchronously while it holds the connection, which gives each
//! handler method `&mut Connection<D>`: it can read or update the per-session
//! `data` slot, send messages and reply to the one it was given.
//!
//! Handlers must not block.  Handing work to another thread or task and
//! sending the result later through the engine is the intended pattern for
//! anything slow.

use serde::de::DeserializeOwned;

use crate::domain::close::{CloseCode, CloseReason};
use crate::domain::connection::Connection;
use crate::protocol::{unpack, PayloadError};

/// A user message delivered to [`ConnectionHandler::on_message`] or to an
/// on-response [`ReplyHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The frame id.  Pass the message to [`Connection::reply`] to answer it.
    pub id: u32,
    pub payload: Vec<u8>,
}

impl IncomingMessage {
    /// Decodes the payload with the crate's payload format.
    pub fn unpack<M: DeserializeOwned>(&self) -> Result<M, PayloadError> {
        unpack(&self.payload)
    }
}

/// Callback registered for one outgoing DATA frame.
pub enum ReplyHandler<D: Send + Sync + 'static> {
    /// Runs once the peer acknowledges the frame.
    OnAck(Box<dyn FnOnce(&mut Connection<D>) + Send>),
    /// Runs once the peer answers the frame with a RESPONSE.
    OnResponse(Box<dyn FnOnce(&mut Connection<D>, IncomingMessage) + Send>),
}

impl<D: Send + Sync + 'static> ReplyHandler<D> {
    pub fn on_ack<F>(callback: F) -> Self
    where
        F: FnOnce(&mut Connection<D>) + Send + 'static,
    {
        ReplyHandler::OnAck(Box::new(callback))
    }

    pub fn on_response<F>(callback: F) -> Self
    where
        F: FnOnce(&mut Connection<D>, IncomingMessage) + Send + 'static,
    {
        ReplyHandler::OnResponse(Box::new(callback))
    }
}

impl<D: Send + Sync + 'static> std::fmt::Debug for ReplyHandler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyHandler::OnAck(_) => f.write_str("ReplyHandler::OnAck"),
            ReplyHandler::OnResponse(_) => f.write_str("ReplyHandler::OnResponse"),
        }
    }
}

/// Lifecycle and message callbacks of a session.
///
/// Only `on_message` is required.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionHandler<D: Send + Sync + 'static>: Send + Sync {
    /// The handshake completed and a fresh session started.
    fn on_open(&self, _conn: &mut Connection<D>) {}

    /// A new (not duplicate) DATA frame arrived.
    fn on_message(&self, conn: &mut Connection<D>, message: IncomingMessage);

    /// The transport dropped with frames outstanding.  The session now waits
    /// for a resume.
    fn on_disconnect(&self, _conn: &mut Connection<D>, _code: CloseCode) {}

    /// A client resumed the session on a new transport.
    fn on_reconnect(&self, _conn: &mut Connection<D>) {}

    /// The session ended for good.  Called exactly once per opened session.
    fn on_close(&self, _conn: &mut Connection<D>, _reason: CloseReason) {}
}
