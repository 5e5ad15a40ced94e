//! Close codes and the reason reported to the application when a session ends.

use std::fmt;

/// Why a transport or session was closed.
///
/// The numeric values follow the WebSocket close-code registry where one
/// exists; tether-specific codes live in the private-use range 4000–4999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Explicit, acknowledged close.  The session may not be resumed.
    Normal,
    /// Malformed frame or invalid handshake id.  Immediate and final.
    ProtocolViolation,
    /// The peer broke a policy such as the reconnect rate limit.
    PolicyViolation,
    /// The transport dropped without a close handshake.  Resumable.
    Abnormal,
    /// The liveness monitor gave up on the peer.  Resumable.
    PingTimeout,
    /// The reconnect window elapsed without a resume.
    SessionExpired,
    /// Any other code reported by the transport.
    Other(u16),
}

impl CloseCode {
    /// Returns the numeric close code.
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::ProtocolViolation => 1002,
            CloseCode::Abnormal => 1006,
            CloseCode::PolicyViolation => 1008,
            CloseCode::PingTimeout => 4000,
            CloseCode::SessionExpired => 4001,
            CloseCode::Other(code) => code,
        }
    }

    /// Short human-readable reason sent along with the close frame.
    pub fn description(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal closure",
            CloseCode::ProtocolViolation => "protocol violation",
            CloseCode::Abnormal => "connection lost",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::PingTimeout => "ping timeout",
            CloseCode::SessionExpired => "session expired",
            CloseCode::Other(_) => "closed",
        }
    }

    /// Whether a session closed with this code may later be resumed.
    pub fn allows_reconnect(self) -> bool {
        !matches!(
            self,
            CloseCode::Normal
                | CloseCode::ProtocolViolation
                | CloseCode::PolicyViolation
                | CloseCode::SessionExpired
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1002 => CloseCode::ProtocolViolation,
            1006 => CloseCode::Abnormal,
            1008 => CloseCode::PolicyViolation,
            4000 => CloseCode::PingTimeout,
            4001 => CloseCode::SessionExpired,
            other => CloseCode::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Which side, or which timer, ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    /// This engine closed the session (explicit close or protocol violation).
    Server,
    /// The peer sent a close or its transport went away.
    Peer,
    /// A timer ended the session: ping timeout or reconnect window expiry.
    Timeout,
}

/// Reported to [`crate::domain::handler::ConnectionHandler::on_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: CloseCode,
    pub initiator: CloseInitiator,
}

impl CloseReason {
    pub fn new(code: CloseCode, initiator: CloseInitiator) -> Self {
        Self { code, initiator }
    }
}
