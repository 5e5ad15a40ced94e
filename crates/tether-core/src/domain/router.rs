//! Message router: interprets one inbound transport message against a
//! connection's state.
//!
//! Text messages are control messages (handshake, ping, close).  Binary
//! messages are frames.  A binary message is decoded completely before any
//! frame in it is dispatched, so a malformed BATCH is rejected as a whole and
//! none of its members reach the application.

use std::time::Instant;

use thiserror::Error;
use tracing::trace;

use crate::domain::connection::{Connection, ConnectionState};
use crate::domain::transport::Inbound;
use crate::protocol::{decode_frame, ControlMessage, Frame, FrameError};

/// What the caller must do after routing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Continue,
    /// The client presented a previously issued session id.
    ResumeRequested(String),
    /// The connection reached `Closed` while routing.
    Closed,
}

/// A protocol violation by the peer.  The connection must be closed with
/// [`crate::domain::close::CloseCode::ProtocolViolation`].
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("malformed control message: {0}")]
    Control(#[from] serde_json::Error),
    #[error("hello with foreign id {0} after the handshake")]
    UnexpectedHello(String),
}

/// Routes `inbound` into `conn`.
///
/// # Errors
///
/// Returns [`RouteError`] for anything the protocol does not allow.  No
/// part of the offending message has been dispatched when this happens.
pub fn route<D: Send + Sync + 'static>(
    conn: &mut Connection<D>,
    inbound: Inbound,
    now: Instant,
) -> Result<RouteOutcome, RouteError> {
    if !conn.is_attached() {
        return Ok(RouteOutcome::Closed);
    }
    conn.touch_client(now);
    match inbound {
        Inbound::Text(text) => {
            let message = ControlMessage::parse(&text)?;
            trace!("session {} received {}", conn.id(), message.type_name());
            route_control(conn, message)
        }
        Inbound::Binary(bytes) => {
            let frame = decode_frame(&bytes)?;
            // Any binary traffic means the client accepted the offered id.
            conn.promote();
            for member in frame.into_frames() {
                dispatch(conn, member);
                if conn.is_closed() {
                    return Ok(RouteOutcome::Closed);
                }
            }
            Ok(RouteOutcome::Continue)
        }
    }
}

fn route_control<D: Send + Sync + 'static>(
    conn: &mut Connection<D>,
    message: ControlMessage,
) -> Result<RouteOutcome, RouteError> {
    let handshaking = conn.state() == ConnectionState::Handshaking;
    match message {
        ControlMessage::Hello { id } if id == conn.id() => {
            conn.promote();
            Ok(RouteOutcome::Continue)
        }
        ControlMessage::Hello { id } if handshaking => Ok(RouteOutcome::ResumeRequested(id)),
        ControlMessage::Hello { id } => Err(RouteError::UnexpectedHello(id)),
        ControlMessage::Ping => {
            conn.promote();
            conn.send_control(&ControlMessage::Pong);
            Ok(RouteOutcome::Continue)
        }
        ControlMessage::Pong => {
            conn.promote();
            Ok(RouteOutcome::Continue)
        }
        ControlMessage::Close { code, id } => {
            conn.receive_close(code, id);
            Ok(RouteOutcome::Closed)
        }
    }
}

fn dispatch<D: Send + Sync + 'static>(conn: &mut Connection<D>, frame: Frame) {
    match frame {
        Frame::Ack { of, id } => conn.handle_ack(of, id),
        Frame::Data { id, payload } => conn.receive_data(id, payload),
        Frame::Response { id, payload } => conn.receive_response(id, payload),
        // `into_frames` never yields a batch.
        Frame::Batch(_) => {}
    }
}
