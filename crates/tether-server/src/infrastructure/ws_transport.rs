//! [`Transport`] implementation over a tokio-tungstenite WebSocket.
//!
//! The engine calls `send` while holding a connection lock, so sending must
//! never await.  [`WsTransport`] therefore only pushes a [`WriterCommand`]
//! onto an unbounded channel; a per-socket writer task ([`write_loop`])
//! performs the actual WebSocket writes.
//!
//! # Buffered amount (for beginners)
//!
//! Browsers expose `WebSocket.bufferedAmount`: bytes handed to the socket but
//! not yet written.  The engine uses the same number for backpressure.  Here
//! it is an `AtomicUsize` shared by both halves: `send` adds the message size,
//! the writer subtracts it once the write completes, and signals `drained`
//! when the count falls from at or above the backpressure threshold to below
//! it.  Only that crossing can release frames the connection has queued.

use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace};

use tether_core::{OutboundMessage, Transport, TransportError};

/// Work item for the writer task.
#[derive(Debug)]
pub enum WriterCommand {
    /// Write `message`; `len` bytes leave the buffered amount afterwards.
    Send { message: WsMessage, len: usize },
    /// Send a close frame and stop writing.
    Close(CloseFrame<'static>),
}

/// The sending half of one WebSocket, as seen by the engine.
pub struct WsTransport {
    commands: mpsc::UnboundedSender<WriterCommand>,
    buffered: Arc<AtomicUsize>,
    closed: bool,
}

impl WsTransport {
    pub fn new(commands: mpsc::UnboundedSender<WriterCommand>, buffered: Arc<AtomicUsize>) -> Self {
        Self {
            commands,
            buffered,
            closed: false,
        }
    }
}

impl Transport for WsTransport {
    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let len = message.len();
        let message = match message {
            OutboundMessage::Binary(bytes) => WsMessage::Binary(bytes),
            OutboundMessage::Text(text) => WsMessage::Text(text),
        };
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.commands
            .send(WriterCommand::Send { message, len })
            .map_err(|_| {
                self.buffered.fetch_sub(len, Ordering::SeqCst);
                TransportError::Closed
            })
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: wire_close_code(code),
            reason: reason.to_string().into(),
        };
        // The writer may already be gone if the socket died first.
        let _ = self.commands.send(WriterCommand::Close(frame));
    }
}

/// Maps a protocol close code to one that may appear in a close frame.
///
/// Codes such as 1006 describe a socket that died without a close frame and
/// must never be sent; those become 1011 (internal error).
pub fn wire_close_code(code: u16) -> WsCloseCode {
    let ws_code = WsCloseCode::from(code);
    if ws_code.is_allowed() {
        ws_code
    } else {
        WsCloseCode::Error
    }
}

/// Drains `commands` into `sink` until the channel closes, a close frame is
/// sent, or a write fails.
///
/// `drain_below` is the engine's backpressure threshold.
pub async fn write_loop<S>(
    mut sink: S,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    buffered: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    drain_below: usize,
    label: String,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send { message, len } => {
                let result = sink.send(message).await;
                let before = buffered.fetch_sub(len, Ordering::SeqCst);
                if before >= drain_below && before - len < drain_below {
                    drained.notify_one();
                }
                if let Err(e) = result {
                    debug!("socket {label}: write failed: {e}");
                    break;
                }
            }
            WriterCommand::Close(frame) => {
                trace!("socket {label}: sending close {}", u16::from(frame.code));
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!("socket {label}: close frame not sent: {e}");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
