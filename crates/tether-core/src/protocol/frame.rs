//! Frame types exchanged on the binary channel.
//!
//! Every binary WebSocket message carries exactly one frame.  A frame is one
//! of four kinds, identified by its first byte:
//!
//! | Tag | Kind       | Carries                                   |
//! |-----|------------|-------------------------------------------|
//! | 0   | `ACK`      | the kind being acknowledged + an id       |
//! | 1   | `DATA`     | an id + an opaque user payload            |
//! | 2   | `RESPONSE` | the id of the DATA it answers + payload   |
//! | 3   | `BATCH`    | any number of length-prefixed sub-frames  |
//!
//! See [`crate::protocol::codec`] for the exact byte layout.

// ── Frame kinds ───────────────────────────────────────────────────────────────

/// The tag byte at offset 0 of every encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Ack = 0,
    Data = 1,
    Response = 2,
    Batch = 3,
}

impl TryFrom<u8> for FrameKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(FrameKind::Ack),
            1 => Ok(FrameKind::Data),
            2 => Ok(FrameKind::Response),
            3 => Ok(FrameKind::Batch),
            _ => Err(()),
        }
    }
}

/// The two frame kinds that carry a payload and therefore take part in
/// acknowledgment, deduplication and replay.
///
/// Acknowledgment bookkeeping is kept per tracked kind because DATA ids and
/// RESPONSE ids live in different id spaces: a DATA id comes from the
/// sender's own counter, while a RESPONSE reuses the id of the DATA frame it
/// answers (which came from the *peer's* counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedKind {
    Data,
    Response,
}

impl TrackedKind {
    /// Both tracked kinds, in tag order.
    pub const ALL: [TrackedKind; 2] = [TrackedKind::Data, TrackedKind::Response];

    /// Returns the wire tag for this kind.
    pub fn frame_kind(self) -> FrameKind {
        match self {
            TrackedKind::Data => FrameKind::Data,
            TrackedKind::Response => FrameKind::Response,
        }
    }
}

impl TryFrom<FrameKind> for TrackedKind {
    type Error = FrameKind;

    fn try_from(kind: FrameKind) -> Result<Self, FrameKind> {
        match kind {
            FrameKind::Data => Ok(TrackedKind::Data),
            FrameKind::Response => Ok(TrackedKind::Response),
            other => Err(other),
        }
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One unit on the binary wire.
///
/// Frames are ephemeral: whichever queue currently holds a frame owns it.
/// `Clone` is needed because a sent DATA frame lives both in the transport
/// pipeline and in the connection's replay list until it is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Confirms that the peer processed the frame `(of, id)`.
    Ack { of: TrackedKind, id: u32 },
    /// A user message.
    Data { id: u32, payload: Vec<u8> },
    /// An answer to the DATA frame with the same `id`.
    Response { id: u32, payload: Vec<u8> },
    /// Several frames sent as one transport message.
    Batch(Vec<Frame>),
}

impl Frame {
    /// Returns the tag byte kind of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Ack { .. } => FrameKind::Ack,
            Frame::Data { .. } => FrameKind::Data,
            Frame::Response { .. } => FrameKind::Response,
            Frame::Batch(_) => FrameKind::Batch,
        }
    }

    /// Returns `(kind, id)` for DATA and RESPONSE frames, `None` otherwise.
    pub fn tracked_id(&self) -> Option<(TrackedKind, u32)> {
        match self {
            Frame::Data { id, .. } => Some((TrackedKind::Data, *id)),
            Frame::Response { id, .. } => Some((TrackedKind::Response, *id)),
            Frame::Ack { .. } | Frame::Batch(_) => None,
        }
    }

    /// Flattens this frame into its non-batch members, in order.
    ///
    /// A non-batch frame yields itself; nested batches are expanded
    /// depth-first so `Batch[a, Batch[b, c]]` yields `[a, b, c]`.
    pub fn into_frames(self) -> Vec<Frame> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Frame>) {
        match self {
            Frame::Batch(members) => {
                for member in members {
                    member.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_try_from_known_tags() {
        assert_eq!(FrameKind::try_from(0), Ok(FrameKind::Ack));
        assert_eq!(FrameKind::try_from(1), Ok(FrameKind::Data));
        assert_eq!(FrameKind::try_from(2), Ok(FrameKind::Response));
        assert_eq!(FrameKind::try_from(3), Ok(FrameKind::Batch));
    }

    #[test]
    fn test_frame_kind_try_from_unknown_tag_fails() {
        assert!(FrameKind::try_from(4).is_err());
        assert!(FrameKind::try_from(0xFF).is_err());
    }

    #[test]
    fn test_tracked_kind_rejects_ack_and_batch() {
        assert_eq!(TrackedKind::try_from(FrameKind::Ack), Err(FrameKind::Ack));
        assert_eq!(TrackedKind::try_from(FrameKind::Batch), Err(FrameKind::Batch));
        assert_eq!(TrackedKind::try_from(FrameKind::Data), Ok(TrackedKind::Data));
    }

    #[test]
    fn test_tracked_id_only_for_payload_frames() {
        let data = Frame::Data { id: 4, payload: vec![] };
        let response = Frame::Response { id: 9, payload: vec![1] };
        let ack = Frame::Ack { of: TrackedKind::Data, id: 4 };

        assert_eq!(data.tracked_id(), Some((TrackedKind::Data, 4)));
        assert_eq!(response.tracked_id(), Some((TrackedKind::Response, 9)));
        assert_eq!(ack.tracked_id(), None);
        assert_eq!(Frame::Batch(vec![]).tracked_id(), None);
    }

    #[test]
    fn test_into_frames_flattens_nested_batches_in_order() {
        // Arrange
        let a = Frame::Data { id: 0, payload: vec![0xA] };
        let b = Frame::Ack { of: TrackedKind::Response, id: 1 };
        let c = Frame::Response { id: 2, payload: vec![0xC] };
        let nested = Frame::Batch(vec![a.clone(), Frame::Batch(vec![b.clone(), Frame::Batch(vec![c.clone()])])]);

        // Act
        let flat = nested.into_frames();

        // Assert
        assert_eq!(flat, vec![a, b, c]);
    }

    #[test]
    fn test_into_frames_of_single_frame_is_itself() {
        let frame = Frame::Data { id: 7, payload: b"x".to_vec() };
        assert_eq!(frame.clone().into_frames(), vec![frame]);
    }
}
