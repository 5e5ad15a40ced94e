//! Mock transport for unit and integration testing.
//!
//! Records every message a connection sends and lets tests simulate a full
//! socket buffer or a failing socket without any networking.

use std::sync::{Arc, Mutex};

use crate::protocol::{decode_frame, ControlMessage, Frame};

use super::{OutboundMessage, Transport, TransportError};

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<OutboundMessage>,
    buffered: usize,
    fail_sends: bool,
    closed: Option<(u16, String)>,
}

/// A [`Transport`] that records instead of sending.
///
/// Clones share state, so a test keeps one clone for inspection and hands a
/// boxed clone to the connection.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a new mock transport with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a boxed clone sharing this mock's state.
    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }

    /// Sets the value reported by [`Transport::buffered_amount`].
    pub fn set_buffered_amount(&self, bytes: usize) {
        self.state.lock().expect("lock poisoned").buffered = bytes;
    }

    /// Makes every subsequent send fail with [`TransportError::Closed`].
    pub fn fail_sends(&self) {
        self.state.lock().expect("lock poisoned").fail_sends = true;
    }

    /// Returns every message sent so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().expect("lock poisoned").sent.clone()
    }

    /// Returns and forgets every message sent so far.
    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.state.lock().expect("lock poisoned").sent)
    }

    /// Decodes every binary message sent so far.
    ///
    /// Panics if a sent message is not a valid frame.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Binary(bytes) => {
                    Some(decode_frame(&bytes).expect("connection sent an undecodable frame"))
                }
                OutboundMessage::Text(_) => None,
            })
            .collect()
    }

    /// Parses every text message sent so far.
    ///
    /// Panics if a sent text message is not a control message.
    pub fn sent_controls(&self) -> Vec<ControlMessage> {
        self.sent()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Text(text) => {
                    Some(ControlMessage::parse(&text).expect("connection sent invalid JSON"))
                }
                OutboundMessage::Binary(_) => None,
            })
            .collect()
    }

    /// Returns the `(code, reason)` passed to [`Transport::close`], if any.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.state.lock().expect("lock poisoned").closed.clone()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_sends || state.closed.is_some() {
            return Err(TransportError::Closed);
        }
        state.sent.push(message);
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.state.lock().expect("lock poisoned").buffered
    }

    fn close(&mut self, code: u16, reason: &str) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed.is_none() {
            state.closed = Some((code, reason.to_string()));
        }
    }
}
