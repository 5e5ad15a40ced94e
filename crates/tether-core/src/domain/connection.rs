//! One logical session and its reliability bookkeeping.
//!
//! # State machine (for beginners)
//!
//! ```text
//!   accept ──▶ Handshaking ──▶ Connected ◀──────────────┐
//!                   │              │                    │ resume
//!                   │              ▼ transport lost      │
//!                   │        AwaitingReconnect ──────────┘
//!                   │              │ window elapsed
//!                   ▼              ▼
//!                 Closed ◀─────────┘
//! ```
//!
//! A `Connection` outlives any single socket.  When the transport drops
//! while frames are still unacknowledged, the connection keeps its id
//! counter, its acknowledgment tables and its dedup sets, and waits for the
//! client to come back on a new socket.  The frames it was waiting on are
//! then replayed as one BATCH.
//!
//! # Time
//!
//! The engine passes an explicit `now` into every event it delivers; the
//! connection remembers the latest one.  Sends issued by application code use
//! the later of that instant and the wall clock, so timestamps never go
//! backwards.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::domain::close::{CloseCode, CloseInitiator, CloseReason};
use crate::domain::config::EngineConfig;
use crate::domain::handler::{ConnectionHandler, IncomingMessage, ReplyHandler};
use crate::domain::liveness::{LastContact, LivenessMonitor, LivenessVerdict};
use crate::domain::transport::{OutboundMessage, Transport};
use crate::protocol::{
    encode_frame, pack, ControlMessage, Frame, MessageCounter, PayloadError, TrackedKind,
};

/// A connection shared between the engine, the registry and socket tasks.
pub type SharedConnection<D> = Arc<Mutex<Connection<D>>>;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Connected,
    AwaitingReconnect,
    Closed,
}

/// Error type for application sends.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("connection is closing")]
    Closing,
    #[error("outgoing message ids are exhausted")]
    IdsExhausted,
    #[error("no DATA frame with id {0} was received on this connection")]
    UnknownRequest(u32),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Result of [`Connection::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The peer stopped answering; the transport has been closed.
    TimedOut,
}

/// Result of [`Connection::transport_lost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossOutcome {
    /// The connection was not attached to a transport.
    Ignored,
    /// The session ended.
    Closed,
    /// The session awaits a resume; carries a copy of the replay backlog.
    Suspended(Vec<Frame>),
}

/// Ids per tracked frame kind.
#[derive(Debug, Default)]
struct KindSets {
    data: HashSet<u32>,
    response: HashSet<u32>,
}

impl KindSets {
    fn get(&self, kind: TrackedKind) -> &HashSet<u32> {
        match kind {
            TrackedKind::Data => &self.data,
            TrackedKind::Response => &self.response,
        }
    }

    fn get_mut(&mut self, kind: TrackedKind) -> &mut HashSet<u32> {
        match kind {
            TrackedKind::Data => &mut self.data,
            TrackedKind::Response => &mut self.response,
        }
    }

    fn clear(&mut self) {
        self.data.clear();
        self.response.clear();
    }
}

/// An explicit close waiting for the peer's acknowledgment.
#[derive(Debug, Clone, Copy)]
struct PendingClose {
    id: u32,
    code: CloseCode,
    last_sent: Instant,
    deadline: Instant,
}

/// One logical client session.
pub struct Connection<D: Send + Sync + 'static> {
    id: String,
    transport: Option<Box<dyn Transport>>,
    generation: u64,
    counter: MessageCounter,
    outbound_ack: KindSets,
    inbound_seen: KindSets,
    pending_replies: HashMap<u32, ReplyHandler<D>>,
    send_queue: VecDeque<Frame>,
    dropped_packets: Vec<Frame>,
    last_contact: LastContact,
    state: ConnectionState,
    may_reconnect: bool,
    opened: bool,
    closing: Option<PendingClose>,
    transport_failed: bool,
    accepted_at: Instant,
    clock: Instant,
    handler: Arc<dyn ConnectionHandler<D>>,
    config: Arc<EngineConfig>,
    /// Application data attached to this session.
    pub data: D,
}

impl<D: Send + Sync + 'static> Connection<D> {
    /// Creates a connection in the `Handshaking` state.
    ///
    /// Accepting a socket counts as contact from the client.
    pub fn new(
        id: String,
        transport: Box<dyn Transport>,
        handler: Arc<dyn ConnectionHandler<D>>,
        config: Arc<EngineConfig>,
        data: D,
        now: Instant,
    ) -> Self {
        debug!("session {id} accepted");
        Self {
            id,
            transport: Some(transport),
            generation: 0,
            counter: MessageCounter::new(),
            outbound_ack: KindSets::default(),
            inbound_seen: KindSets::default(),
            pending_replies: HashMap::new(),
            send_queue: VecDeque::new(),
            dropped_packets: Vec::new(),
            last_contact: LastContact {
                client: Some(now),
                server: None,
            },
            state: ConnectionState::Handshaking,
            may_reconnect: true,
            opened: false,
            closing: None,
            transport_failed: false,
            accepted_at: now,
            clock: now,
            handler,
            config,
            data,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Incremented every time a new transport is bound by a resume.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn may_reconnect(&self) -> bool {
        self.may_reconnect
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Whether a transport currently backs this connection.
    pub fn is_attached(&self) -> bool {
        self.transport.is_some()
            && matches!(
                self.state,
                ConnectionState::Handshaking | ConnectionState::Connected
            )
    }

    pub fn last_contact(&self) -> LastContact {
        self.last_contact
    }

    /// Frames withheld by backpressure or by the current state.
    pub fn queued_len(&self) -> usize {
        self.send_queue.len()
    }

    /// DATA and RESPONSE frames sent but not yet acknowledged, oldest first.
    pub fn unacknowledged(&self) -> &[Frame] {
        &self.dropped_packets
    }

    pub fn is_awaiting_ack(&self, kind: TrackedKind, id: u32) -> bool {
        self.outbound_ack.get(kind).contains(&id)
    }

    pub fn has_seen(&self, kind: TrackedKind, id: u32) -> bool {
        self.inbound_seen.get(kind).contains(&id)
    }

    // ── Clock ─────────────────────────────────────────────────────────────────

    pub(crate) fn observe(&mut self, now: Instant) {
        if now > self.clock {
            self.clock = now;
        }
    }

    fn now(&self) -> Instant {
        Instant::now().max(self.clock)
    }

    pub(crate) fn touch_client(&mut self, now: Instant) {
        self.observe(now);
        self.last_contact.client = Some(self.now());
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    pub(crate) fn send_hello(&mut self) {
        let hello = ControlMessage::Hello { id: self.id.clone() };
        self.send_control(&hello);
    }

    /// Completes the handshake as a fresh session.
    pub(crate) fn promote(&mut self) {
        if self.state != ConnectionState::Handshaking {
            return;
        }
        self.state = ConnectionState::Connected;
        self.opened = true;
        info!("session {} opened", self.id);
        let handler = Arc::clone(&self.handler);
        handler.on_open(self);
        self.flush_queue();
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends a DATA frame and returns its id.
    ///
    /// The frame is retained for replay until the peer acknowledges it.
    pub fn send(&mut self, payload: impl Into<Vec<u8>>) -> Result<u32, SendError> {
        self.check_sendable()?;
        let id = self.counter.next().ok_or(SendError::IdsExhausted)?;
        self.track(Frame::Data {
            id,
            payload: payload.into(),
        });
        Ok(id)
    }

    /// Packs `message` with the payload format and sends it.
    pub fn send_packed<M: Serialize + ?Sized>(&mut self, message: &M) -> Result<u32, SendError> {
        let payload = pack(message)?;
        self.send(payload)
    }

    /// Sends a DATA frame and registers `reply` for its acknowledgment or
    /// its response.
    pub fn send_with_reply(
        &mut self,
        payload: impl Into<Vec<u8>>,
        reply: ReplyHandler<D>,
    ) -> Result<u32, SendError> {
        let id = self.send(payload)?;
        self.pending_replies.insert(id, reply);
        Ok(id)
    }

    /// Answers `request` with a RESPONSE frame carrying the request's id.
    pub fn reply(
        &mut self,
        request: &IncomingMessage,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), SendError> {
        self.check_sendable()?;
        if !self.inbound_seen.data.contains(&request.id) {
            return Err(SendError::UnknownRequest(request.id));
        }
        self.track(Frame::Response {
            id: request.id,
            payload: payload.into(),
        });
        Ok(())
    }

    pub fn reply_packed<M: Serialize + ?Sized>(
        &mut self,
        request: &IncomingMessage,
        message: &M,
    ) -> Result<(), SendError> {
        let payload = pack(message)?;
        self.reply(request, payload)
    }

    fn check_sendable(&self) -> Result<(), SendError> {
        if self.state == ConnectionState::Closed {
            return Err(SendError::Closed);
        }
        if self.closing.is_some() {
            return Err(SendError::Closing);
        }
        Ok(())
    }

    fn track(&mut self, frame: Frame) {
        if let Some((kind, id)) = frame.tracked_id() {
            self.outbound_ack.get_mut(kind).insert(id);
        }
        self.dropped_packets.push(frame.clone());
        self.enqueue_or_send(frame);
    }

    fn can_transmit(&self) -> bool {
        self.state == ConnectionState::Connected
            && !self.transport_failed
            && self
                .transport
                .as_ref()
                .is_some_and(|t| t.buffered_amount() < self.config.backpressure_threshold)
    }

    /// Sends `frame` now if nothing is queued ahead of it and the transport
    /// has room; queues it otherwise.
    fn enqueue_or_send(&mut self, frame: Frame) {
        if self.send_queue.is_empty() && self.can_transmit() {
            self.transmit_frame(&frame);
        } else {
            trace!("session {} queued {:?} frame", self.id, frame.kind());
            self.send_queue.push_back(frame);
        }
    }

    fn transmit(&mut self, message: OutboundMessage) {
        if self.transport_failed {
            return;
        }
        let now = self.now();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.send(message) {
            Ok(()) => self.last_contact.server = Some(now),
            Err(err) => {
                warn!("session {} send failed: {err}", self.id);
                self.transport_failed = true;
            }
        }
    }

    fn transmit_frame(&mut self, frame: &Frame) {
        self.transmit(OutboundMessage::Binary(encode_frame(frame)));
    }

    pub(crate) fn send_control(&mut self, message: &ControlMessage) {
        match message.to_text() {
            Ok(text) => self.transmit(OutboundMessage::Text(text)),
            Err(err) => warn!(
                "session {} could not encode {} message: {err}",
                self.id,
                message.type_name()
            ),
        }
    }

    /// Sends the whole send queue as one BATCH, if the transport has room.
    pub(crate) fn flush_queue(&mut self) {
        if self.send_queue.is_empty() || !self.can_transmit() {
            return;
        }
        let frames: Vec<Frame> = self
            .send_queue
            .drain(..)
            .flat_map(Frame::into_frames)
            .collect();
        debug!("session {} flushing {} queued frame(s)", self.id, frames.len());
        self.transmit_frame(&Frame::Batch(frames));
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    pub(crate) fn handle_ack(&mut self, of: TrackedKind, id: u32) {
        if let Some(closing) = self.closing {
            if of == TrackedKind::Data && closing.id == id {
                debug!("session {} close acknowledged", self.id);
                self.finalize_close(CloseReason::new(closing.code, CloseInitiator::Server));
                return;
            }
        }
        if !self.outbound_ack.get_mut(of).remove(&id) {
            trace!("session {} ignoring ACK for unknown {of:?} {id}", self.id);
            return;
        }
        self.dropped_packets
            .retain(|frame| frame.tracked_id() != Some((of, id)));
        if of == TrackedKind::Data
            && matches!(self.pending_replies.get(&id), Some(ReplyHandler::OnAck(_)))
        {
            if let Some(ReplyHandler::OnAck(callback)) = self.pending_replies.remove(&id) {
                callback(self);
            }
        }
    }

    /// Acknowledges a DATA frame and delivers it unless it is a duplicate.
    pub(crate) fn receive_data(&mut self, id: u32, payload: Vec<u8>) {
        self.enqueue_or_send(Frame::Ack {
            of: TrackedKind::Data,
            id,
        });
        if !self.inbound_seen.data.insert(id) {
            debug!("session {} dropped duplicate DATA {id}", self.id);
            return;
        }
        let handler = Arc::clone(&self.handler);
        handler.on_message(self, IncomingMessage { id, payload });
    }

    pub(crate) fn receive_response(&mut self, id: u32, payload: Vec<u8>) {
        self.enqueue_or_send(Frame::Ack {
            of: TrackedKind::Response,
            id,
        });
        if !self.inbound_seen.response.insert(id) {
            debug!("session {} dropped duplicate RESPONSE {id}", self.id);
            return;
        }
        match self.pending_replies.remove(&id) {
            Some(ReplyHandler::OnResponse(callback)) => {
                callback(self, IncomingMessage { id, payload });
            }
            Some(on_ack) => {
                self.pending_replies.insert(id, on_ack);
                debug!("session {} RESPONSE {id} has no response handler", self.id);
            }
            None => debug!("session {} ignoring RESPONSE for unknown id {id}", self.id),
        }
    }

    /// The peer closed the session; acknowledge and finish.
    pub(crate) fn receive_close(&mut self, code: u16, id: u32) {
        let code = CloseCode::from(code);
        info!("session {} closed by peer ({code})", self.id);
        self.transmit_frame(&Frame::Ack {
            of: TrackedKind::Data,
            id,
        });
        self.finalize_close(CloseReason::new(code, CloseInitiator::Peer));
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Runs the timers of this connection: handshake grace, close retry and
    /// liveness.
    pub(crate) fn tick(&mut self, now: Instant) -> TickOutcome {
        self.observe(now);
        match self.state {
            ConnectionState::Handshaking => {
                if now.saturating_duration_since(self.accepted_at) >= self.config.handshake_grace() {
                    debug!("session {} handshake grace elapsed", self.id);
                    self.promote();
                }
                TickOutcome::Continue
            }
            ConnectionState::Connected => {
                if let Some(mut closing) = self.closing {
                    if now >= closing.deadline {
                        warn!("session {} close never acknowledged; forcing", self.id);
                        self.finalize_close(CloseReason::new(closing.code, CloseInitiator::Timeout));
                    } else if now.saturating_duration_since(closing.last_sent)
                        >= self.config.close_retry_interval()
                    {
                        debug!("session {} retrying close", self.id);
                        closing.last_sent = now;
                        self.closing = Some(closing);
                        self.send_control(&ControlMessage::Close {
                            code: closing.code.as_u16(),
                            id: closing.id,
                        });
                    }
                    return TickOutcome::Continue;
                }
                let monitor = LivenessMonitor::new(self.config.ping_timeout());
                match monitor.check(&self.last_contact, now) {
                    LivenessVerdict::Healthy => TickOutcome::Continue,
                    LivenessVerdict::PingDue => {
                        self.send_control(&ControlMessage::Ping);
                        TickOutcome::Continue
                    }
                    LivenessVerdict::TimedOut => {
                        warn!("session {} ping timeout", self.id);
                        if let Some(mut transport) = self.transport.take() {
                            let code = CloseCode::PingTimeout;
                            transport.close(code.as_u16(), code.description());
                        }
                        TickOutcome::TimedOut
                    }
                }
            }
            ConnectionState::AwaitingReconnect | ConnectionState::Closed => TickOutcome::Continue,
        }
    }

    /// Closes the session for good.
    ///
    /// On a live transport this sends a tracked `close` message and waits for
    /// its acknowledgment, retrying on the configured interval.  Otherwise the
    /// session is finalized immediately.
    pub fn close(&mut self, code: CloseCode) {
        if self.state == ConnectionState::Closed || self.closing.is_some() {
            return;
        }
        self.may_reconnect = false;
        let attached = self.state == ConnectionState::Connected && self.transport.is_some();
        let id = if attached { self.counter.next() } else { None };
        let Some(id) = id else {
            self.finalize_close(CloseReason::new(code, CloseInitiator::Server));
            return;
        };
        let now = self.now();
        self.outbound_ack.data.insert(id);
        self.closing = Some(PendingClose {
            id,
            code,
            last_sent: now,
            deadline: now + self.config.reconnect_window(),
        });
        info!("session {} closing ({code})", self.id);
        self.send_control(&ControlMessage::Close {
            code: code.as_u16(),
            id,
        });
    }

    /// Closes the transport with `code` and ends the session immediately.
    pub(crate) fn fail(&mut self, code: CloseCode, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(code.as_u16(), reason);
        }
        self.finalize_close(CloseReason::new(code, CloseInitiator::Server));
    }

    /// The transport went away with `code`.
    pub(crate) fn transport_lost(&mut self, code: CloseCode, now: Instant) -> LossOutcome {
        self.observe(now);
        self.transport = None;
        self.transport_failed = false;
        match self.state {
            ConnectionState::Closed | ConnectionState::AwaitingReconnect => LossOutcome::Ignored,
            ConnectionState::Handshaking => {
                debug!("session {} lost during handshake", self.id);
                self.discard();
                LossOutcome::Closed
            }
            ConnectionState::Connected => {
                self.send_queue.clear();
                if let Some(closing) = self.closing {
                    self.finalize_close(CloseReason::new(closing.code, CloseInitiator::Server));
                    return LossOutcome::Closed;
                }
                let initiator = if code == CloseCode::PingTimeout {
                    CloseInitiator::Timeout
                } else {
                    CloseInitiator::Peer
                };
                if !self.may_reconnect
                    || !code.allows_reconnect()
                    || self.dropped_packets.is_empty()
                {
                    self.finalize_close(CloseReason::new(code, initiator));
                    return LossOutcome::Closed;
                }
                self.state = ConnectionState::AwaitingReconnect;
                info!(
                    "session {} lost its transport ({code}); holding {} frame(s) for replay",
                    self.id,
                    self.dropped_packets.len()
                );
                let handler = Arc::clone(&self.handler);
                handler.on_disconnect(self, code);
                LossOutcome::Suspended(self.dropped_packets.clone())
            }
        }
    }

    /// Binds a new transport after a resume and replays `backlog`.
    ///
    /// Returns the new generation, or `None` (closing `transport`) if the
    /// session is no longer waiting for a resume.
    pub(crate) fn resume(
        &mut self,
        mut transport: Box<dyn Transport>,
        backlog: Vec<Frame>,
        now: Instant,
    ) -> Option<u64> {
        self.observe(now);
        if self.state != ConnectionState::AwaitingReconnect {
            transport.close(
                CloseCode::ProtocolViolation.as_u16(),
                "session is not resumable",
            );
            return None;
        }
        self.transport = Some(transport);
        self.generation += 1;
        self.state = ConnectionState::Connected;
        self.transport_failed = false;
        self.last_contact = LastContact {
            client: Some(self.now()),
            server: None,
        };
        self.send_hello();
        info!(
            "session {} resumed; replaying {} frame(s)",
            self.id,
            backlog.len()
        );
        if !backlog.is_empty() {
            self.send_queue.push_front(Frame::Batch(backlog));
        }
        self.flush_queue();
        let handler = Arc::clone(&self.handler);
        handler.on_reconnect(self);
        Some(self.generation)
    }

    /// Moves the connection to `Closed`, closes any transport and reports
    /// the close to the handler once.
    pub(crate) fn finalize_close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.may_reconnect = false;
        self.closing = None;
        self.send_queue.clear();
        self.dropped_packets.clear();
        self.outbound_ack.clear();
        self.pending_replies.clear();
        if let Some(mut transport) = self.transport.take() {
            transport.close(reason.code.as_u16(), reason.code.description());
        }
        info!(
            "session {} closed ({}, {:?})",
            self.id, reason.code, reason.initiator
        );
        if self.opened {
            let handler = Arc::clone(&self.handler);
            handler.on_close(self, reason);
        }
    }

    /// Detaches the transport without closing it.
    pub(crate) fn take_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    /// Ends a connection that never opened, without callbacks.
    pub(crate) fn discard(&mut self) {
        self.state = ConnectionState::Closed;
        self.transport = None;
        self.send_queue.clear();
        self.dropped_packets.clear();
        self.outbound_ack.clear();
        self.pending_replies.clear();
    }

    /// Returns `true` once after a transport send failed.
    pub(crate) fn take_transport_failure(&mut self) -> bool {
        std::mem::take(&mut self.transport_failed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handler::MockConnectionHandler;
    use crate::domain::transport::mock::MockTransport;
    use std::time::Duration;

    fn connection(handler: MockConnectionHandler<u32>) -> (Connection<u32>, MockTransport, Instant) {
        let mock = MockTransport::new();
        let t0 = Instant::now();
        let conn = Connection::new(
            "s1".to_string(),
            mock.boxed(),
            Arc::new(handler),
            Arc::new(EngineConfig::default()),
            0,
            t0,
        );
        (conn, mock, t0)
    }

    fn opened_handler() -> MockConnectionHandler<u32> {
        let mut handler = MockConnectionHandler::new();
        handler.expect_on_open().times(1).return_const(());
        handler
    }

    fn opened(handler: MockConnectionHandler<u32>) -> (Connection<u32>, MockTransport, Instant) {
        let (mut conn, mock, t0) = connection(handler);
        conn.promote();
        (conn, mock, t0)
    }

    fn data(id: u32, payload: &[u8]) -> Frame {
        Frame::Data {
            id,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_send_while_handshaking_is_queued_then_flushed_on_promote() {
        // Arrange
        let (mut conn, mock, _) = connection(opened_handler());

        // Act
        let id = conn.send(b"early".to_vec()).unwrap();

        // Assert: nothing on the wire until the handshake completes.
        assert!(mock.sent_frames().is_empty());
        conn.promote();
        assert_eq!(mock.sent_frames(), vec![Frame::Batch(vec![data(id, b"early")])]);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_when_connected_transmits_and_tracks() {
        let (mut conn, mock, _) = opened(opened_handler());

        let first = conn.send(b"a".to_vec()).unwrap();
        let second = conn.send(b"b".to_vec()).unwrap();

        assert_eq!((first, second), (0, 1));
        assert_eq!(mock.sent_frames(), vec![data(0, b"a"), data(1, b"b")]);
        assert!(conn.is_awaiting_ack(TrackedKind::Data, 0));
        assert_eq!(conn.unacknowledged().len(), 2);
    }

    #[test]
    fn test_ack_removes_tracking_and_runs_on_ack() {
        // Arrange
        let (mut conn, _mock, _) = opened(opened_handler());
        let id = conn
            .send_with_reply(b"x".to_vec(), ReplyHandler::on_ack(|conn| conn.data += 1))
            .unwrap();

        // Act
        conn.handle_ack(TrackedKind::Data, id);
        conn.handle_ack(TrackedKind::Data, id);

        // Assert
        assert_eq!(conn.data, 1);
        assert!(!conn.is_awaiting_ack(TrackedKind::Data, id));
        assert!(conn.unacknowledged().is_empty());
    }

    #[test]
    fn test_ack_of_wrong_kind_is_ignored() {
        let (mut conn, _mock, _) = opened(opened_handler());
        let id = conn.send(b"x".to_vec()).unwrap();

        conn.handle_ack(TrackedKind::Response, id);

        assert!(conn.is_awaiting_ack(TrackedKind::Data, id));
        assert_eq!(conn.unacknowledged().len(), 1);
    }

    #[test]
    fn test_duplicate_data_invokes_handler_once_and_acks_twice() {
        // Arrange
        let mut handler = opened_handler();
        handler.expect_on_message().times(1).return_const(());
        let (mut conn, mock, _) = opened(handler);

        // Act
        conn.receive_data(0, b"hi".to_vec());
        conn.receive_data(0, b"hi".to_vec());

        // Assert
        let ack = Frame::Ack {
            of: TrackedKind::Data,
            id: 0,
        };
        assert_eq!(mock.sent_frames(), vec![ack.clone(), ack]);
        assert!(conn.has_seen(TrackedKind::Data, 0));
    }

    #[test]
    fn test_reply_reuses_request_id() {
        // Arrange
        let mut handler = opened_handler();
        handler.expect_on_message().times(1).returning(|conn, message| {
            conn.reply(&message, b"pong".to_vec()).unwrap();
        });
        let (mut conn, mock, _) = opened(handler);

        // Act
        conn.receive_data(7, b"ping".to_vec());

        // Assert: the ACK goes out before the handler's answer.
        assert_eq!(
            mock.sent_frames(),
            vec![
                Frame::Ack {
                    of: TrackedKind::Data,
                    id: 7
                },
                Frame::Response {
                    id: 7,
                    payload: b"pong".to_vec()
                },
            ]
        );
        assert!(conn.is_awaiting_ack(TrackedKind::Response, 7));
    }

    #[test]
    fn test_reply_to_unknown_request_is_rejected() {
        let (mut conn, _mock, _) = opened(opened_handler());
        let stray = IncomingMessage {
            id: 9,
            payload: Vec::new(),
        };
        assert!(matches!(
            conn.reply(&stray, b"x".to_vec()),
            Err(SendError::UnknownRequest(9))
        ));
    }

    #[test]
    fn test_response_runs_on_response_handler() {
        // Arrange
        let (mut conn, mock, _) = opened(opened_handler());
        let id = conn
            .send_with_reply(
                b"question".to_vec(),
                ReplyHandler::on_response(|conn, message| conn.data = message.payload.len() as u32),
            )
            .unwrap();
        mock.take_sent();

        // Act
        conn.handle_ack(TrackedKind::Data, id);
        conn.receive_response(id, b"answer".to_vec());

        // Assert
        assert_eq!(conn.data, 6);
        assert_eq!(
            mock.sent_frames(),
            vec![Frame::Ack {
                of: TrackedKind::Response,
                id
            }]
        );
    }

    #[test]
    fn test_response_for_unknown_id_is_acked_and_ignored() {
        let (mut conn, mock, _) = opened(opened_handler());
        conn.receive_response(42, b"late".to_vec());
        assert_eq!(
            mock.sent_frames(),
            vec![Frame::Ack {
                of: TrackedKind::Response,
                id: 42
            }]
        );
    }

    #[test]
    fn test_backpressure_queues_then_flushes_in_order() {
        // Arrange
        let (mut conn, mock, _) = opened(opened_handler());
        mock.set_buffered_amount(512);

        // Act
        let ids: Vec<u32> = (0..3u8).map(|n| conn.send(vec![n]).unwrap()).collect();

        // Assert: nothing sent while the buffer is full.
        assert!(mock.sent_frames().is_empty());
        assert_eq!(conn.queued_len(), 3);
        assert_eq!(conn.unacknowledged().len(), 3);

        mock.set_buffered_amount(0);
        conn.flush_queue();
        assert_eq!(
            mock.sent_frames(),
            vec![Frame::Batch(vec![data(ids[0], &[0]), data(ids[1], &[1]), data(ids[2], &[2])])]
        );
        assert_eq!(conn.queued_len(), 0);
    }

    #[test]
    fn test_send_below_threshold_but_with_queue_keeps_fifo() {
        let (mut conn, mock, _) = opened(opened_handler());
        mock.set_buffered_amount(600);
        conn.send(b"first".to_vec()).unwrap();
        mock.set_buffered_amount(0);

        conn.send(b"second".to_vec()).unwrap();

        assert!(mock.sent_frames().is_empty());
        assert_eq!(conn.queued_len(), 2);
    }

    #[test]
    fn test_send_failure_is_reported_once() {
        let (mut conn, mock, _) = opened(opened_handler());
        mock.fail_sends();

        conn.send(b"lost".to_vec()).unwrap();

        assert!(conn.take_transport_failure());
        assert!(!conn.take_transport_failure());
        assert_eq!(conn.unacknowledged().len(), 1);
    }

    #[test]
    fn test_close_waits_for_ack_then_finalizes() {
        // Arrange
        let mut handler = opened_handler();
        handler.expect_on_close().times(1).return_const(());
        let (mut conn, mock, _) = opened(handler);

        // Act
        conn.close(CloseCode::Normal);

        // Assert
        assert_eq!(
            mock.sent_controls(),
            vec![ControlMessage::Close { code: 1000, id: 0 }]
        );
        assert!(matches!(conn.send(b"x".to_vec()), Err(SendError::Closing)));
        assert!(!conn.is_closed());
        conn.handle_ack(TrackedKind::Data, 0);
        assert!(conn.is_closed());
        assert_eq!(mock.closed_with(), Some((1000, "normal closure".to_string())));
        assert!(!conn.may_reconnect());
    }

    #[test]
    fn test_unacknowledged_close_is_retried_then_forced() {
        // Arrange
        let mut handler = opened_handler();
        handler
            .expect_on_close()
            .withf(|_, reason| reason.initiator == CloseInitiator::Timeout)
            .times(1)
            .return_const(());
        let (mut conn, mock, t0) = opened(handler);
        conn.close(CloseCode::Normal);

        // Act
        conn.tick(t0 + Duration::from_secs(11));
        conn.tick(t0 + Duration::from_secs(41));

        // Assert
        let closes = mock
            .sent_controls()
            .into_iter()
            .filter(|m| matches!(m, ControlMessage::Close { .. }))
            .count();
        assert_eq!(closes, 2);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_peer_close_is_acknowledged() {
        let mut handler = opened_handler();
        handler
            .expect_on_close()
            .withf(|_, reason| reason.initiator == CloseInitiator::Peer)
            .times(1)
            .return_const(());
        let (mut conn, mock, _) = opened(handler);

        conn.receive_close(1000, 4);

        assert_eq!(
            mock.sent_frames(),
            vec![Frame::Ack {
                of: TrackedKind::Data,
                id: 4
            }]
        );
        assert!(conn.is_closed());
    }

    #[test]
    fn test_transport_lost_without_outstanding_frames_closes() {
        let mut handler = opened_handler();
        handler.expect_on_close().times(1).return_const(());
        let (mut conn, _mock, t0) = opened(handler);

        let outcome = conn.transport_lost(CloseCode::Abnormal, t0);

        assert_eq!(outcome, LossOutcome::Closed);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_transport_lost_with_outstanding_frames_suspends() {
        // Arrange
        let mut handler = opened_handler();
        handler.expect_on_disconnect().times(1).return_const(());
        let (mut conn, _mock, t0) = opened(handler);
        conn.send(b"a".to_vec()).unwrap();

        // Act
        let outcome = conn.transport_lost(CloseCode::Abnormal, t0);

        // Assert
        assert_eq!(outcome, LossOutcome::Suspended(vec![data(0, b"a")]));
        assert_eq!(conn.state(), ConnectionState::AwaitingReconnect);
        assert!(!conn.is_attached());
        assert_eq!(conn.transport_lost(CloseCode::Abnormal, t0), LossOutcome::Ignored);
    }

    #[test]
    fn test_lost_during_handshake_closes_silently() {
        let (mut conn, _mock, t0) = connection(MockConnectionHandler::new());
        assert_eq!(conn.transport_lost(CloseCode::Abnormal, t0), LossOutcome::Closed);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_resume_replays_backlog_then_queued_frames_as_one_batch() {
        // Arrange
        let mut handler = opened_handler();
        handler.expect_on_disconnect().times(1).return_const(());
        handler.expect_on_reconnect().times(1).return_const(());
        let (mut conn, _old, t0) = opened(handler);
        for n in 0..3u8 {
            conn.send(vec![n]).unwrap();
        }
        let LossOutcome::Suspended(backlog) = conn.transport_lost(CloseCode::Abnormal, t0) else {
            panic!("expected the session to be suspended");
        };
        let late = conn.send(b"late".to_vec()).unwrap();

        // Act
        let fresh = MockTransport::new();
        let generation = conn.resume(fresh.boxed(), backlog, t0 + Duration::from_secs(1));

        // Assert
        assert_eq!(generation, Some(1));
        assert_eq!(
            fresh.sent_controls(),
            vec![ControlMessage::Hello { id: "s1".to_string() }]
        );
        assert_eq!(
            fresh.sent_frames(),
            vec![Frame::Batch(vec![
                data(0, &[0]),
                data(1, &[1]),
                data(2, &[2]),
                data(late, b"late"),
            ])]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_resume_of_closed_session_closes_new_transport() {
        let mut handler = opened_handler();
        handler.expect_on_close().times(1).return_const(());
        let (mut conn, _mock, t0) = opened(handler);
        conn.close(CloseCode::Normal);
        conn.handle_ack(TrackedKind::Data, 0);

        let fresh = MockTransport::new();
        assert_eq!(conn.resume(fresh.boxed(), Vec::new(), t0), None);
        assert_eq!(fresh.closed_with().map(|(code, _)| code), Some(1002));
    }

    #[test]
    fn test_tick_sends_ping_when_quiet() {
        let (mut conn, mock, t0) = opened(opened_handler());

        let outcome = conn.tick(t0 + Duration::from_secs(11));

        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(mock.sent_controls(), vec![ControlMessage::Ping]);
    }

    #[test]
    fn test_tick_times_out_silent_peer() {
        // Arrange
        let (mut conn, mock, t0) = opened(opened_handler());

        // Act
        conn.tick(t0 + Duration::from_secs(11));
        conn.tick(t0 + Duration::from_secs(22));
        let outcome = conn.tick(t0 + Duration::from_secs(23));

        // Assert
        assert_eq!(outcome, TickOutcome::TimedOut);
        assert_eq!(mock.closed_with().map(|(code, _)| code), Some(4000));
    }

    #[test]
    fn test_peer_traffic_keeps_connection_alive() {
        let (mut conn, _mock, t0) = opened(opened_handler());
        for secs in [11, 22, 33, 44] {
            conn.touch_client(t0 + Duration::from_secs(secs));
            assert_eq!(
                conn.tick(t0 + Duration::from_secs(secs)),
                TickOutcome::Continue
            );
        }
    }

    #[test]
    fn test_handshake_grace_promotes_silent_client() {
        let (mut conn, _mock, t0) = connection(opened_handler());

        conn.tick(t0 + Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Handshaking);

        conn.tick(t0 + Duration::from_secs(3));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_after_close_is_rejected() {
        let mut handler = opened_handler();
        handler.expect_on_close().times(1).return_const(());
        let (mut conn, _mock, t0) = opened(handler);
        conn.transport_lost(CloseCode::Normal, t0);

        assert!(matches!(conn.send(b"x".to_vec()), Err(SendError::Closed)));
    }
}
