//! The demo application: answers every message with its own payload.
//!
//! Each DATA frame is answered with a RESPONSE frame carrying the same id,
//! so a client can match echoes to requests.

use tether_core::{CloseCode, CloseReason, Connection, ConnectionHandler, IncomingMessage};
use tracing::{debug, info, warn};

/// Per-session data kept by [`EchoHandler`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub messages: u64,
    pub reconnects: u32,
}

/// Echoes payloads back as responses.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl ConnectionHandler<SessionStats> for EchoHandler {
    fn on_open(&self, conn: &mut Connection<SessionStats>) {
        info!("session {} opened", conn.id());
    }

    fn on_message(&self, conn: &mut Connection<SessionStats>, message: IncomingMessage) {
        conn.data.messages += 1;
        debug!(
            "session {} echoing message {} ({} bytes)",
            conn.id(),
            message.id,
            message.payload.len()
        );
        let payload = message.payload.clone();
        if let Err(e) = conn.reply(&message, payload) {
            warn!("session {} could not echo message {}: {e}", conn.id(), message.id);
        }
    }

    fn on_disconnect(&self, conn: &mut Connection<SessionStats>, code: CloseCode) {
        info!("session {} disconnected ({code}); awaiting resume", conn.id());
    }

    fn on_reconnect(&self, conn: &mut Connection<SessionStats>) {
        conn.data.reconnects += 1;
        info!("session {} resumed", conn.id());
    }

    fn on_close(&self, conn: &mut Connection<SessionStats>, reason: CloseReason) {
        info!(
            "session {} closed ({}, {:?}) after {} message(s)",
            conn.id(),
            reason.code,
            reason.initiator,
            conn.data.messages
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
