//! Control messages for the handshake and connection-management layer.
//!
//! Control messages travel as WebSocket *text* frames, so they can never be
//! confused with the binary frames handled by [`crate::protocol::codec`].
//!
//! # JSON discriminant
//!
//! Every control message is a JSON object with a `"type"` field naming the
//! variant; the remaining fields sit next to it:
//!
//! ```json
//! {"type":"hello","id":"3f2a9c0e6d1b4e7a9f0c2b5d8e1a4c7f"}
//! {"type":"ping"}
//! {"type":"pong"}
//! {"type":"close","code":1000,"id":7}
//! ```
//!
//! # Handshake
//!
//! ```text
//! Server                                   Client
//! ──────                                   ──────
//! accept socket
//! hello{id: fresh}          ───────────▶
//!                           ◀───────────   hello{id: fresh}      (new session)
//!                                    or    hello{id: previous}   (resume)
//!                                    or    (silence / binary traffic)
//! ```

use serde::{Deserialize, Serialize};

/// A message of the handshake / connection-management layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Session identity announcement.
    ///
    /// Sent by the accepting side immediately on connect with a fresh id.  A
    /// client echoes the same id to confirm a new session, or presents a
    /// previously issued id to resume that session.
    Hello { id: String },

    /// Liveness probe.  Answered with [`ControlMessage::Pong`].
    Ping,

    /// Answer to a [`ControlMessage::Ping`].
    Pong,

    /// Graceful shutdown request.
    ///
    /// `id` comes from the sender's outgoing message counter; the receiver
    /// confirms the close with `ACK(DATA, id)`.  Until that acknowledgment
    /// arrives the sender keeps retrying.
    Close { code: u16, id: u32 },
}

impl ControlMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the text is not a known control message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes this message for a text frame.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short variant name for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Hello { .. } => "hello",
            ControlMessage::Ping => "ping",
            ControlMessage::Pong => "pong",
            ControlMessage::Close { .. } => "close",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_serializes_with_type_tag() {
        let msg = ControlMessage::Hello { id: "abc123".to_string() };
        assert_eq!(msg.to_text().unwrap(), r#"{"type":"hello","id":"abc123"}"#);
    }

    #[test]
    fn test_ping_serializes_without_fields() {
        assert_eq!(ControlMessage::Ping.to_text().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_close_parses_code_and_id() {
        let parsed = ControlMessage::parse(r#"{"type":"close","code":1000,"id":7}"#).unwrap();
        assert_eq!(parsed, ControlMessage::Close { code: 1000, id: 7 });
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ControlMessage::parse(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_bare_string_is_rejected() {
        assert!(ControlMessage::parse("hello").is_err());
    }

    #[test]
    fn test_hello_without_id_is_rejected() {
        assert!(ControlMessage::parse(r#"{"type":"hello"}"#).is_err());
    }

    #[test]
    fn test_type_name_matches_tag() {
        assert_eq!(ControlMessage::Pong.type_name(), "pong");
        assert_eq!(ControlMessage::Close { code: 1000, id: 0 }.type_name(), "close");
    }
}
