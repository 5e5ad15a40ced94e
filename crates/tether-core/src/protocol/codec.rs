//! Binary codec for tether frames.
//!
//! Wire format (all integers big-endian):
//!
//! ```text
//! ACK       [0][acked kind:1][varint id]
//! DATA      [1][varint id][payload:N]
//! RESPONSE  [2][varint id][payload:N]
//! BATCH     [3]([varint sub-frame length][sub-frame])*
//! ```
//!
//! A *varint* here is a length-prefixed unsigned integer: one byte holding
//! `byte_length - 1`, followed by the minimal big-endian representation of
//! the value.  So `0` encodes as `[0x00, 0x00]`, `300` as `[0x01, 0x01, 0x2C]`.
//!
//! DATA and RESPONSE payloads are not length-prefixed: the payload is simply
//! everything after the id.  This is safe because every frame is either a
//! whole transport message or a length-delimited BATCH member.

use thiserror::Error;

use crate::protocol::frame::{Frame, FrameKind, TrackedKind};

/// Widest integer a varint may carry, in bytes.
const MAX_VARINT_BYTES: usize = 8;

/// Maximum BATCH nesting accepted by the decoder.
///
/// Each nesting level costs only a couple of bytes on the wire, so an
/// unbounded depth would let a single message exhaust the decoder's stack.
pub const MAX_BATCH_DEPTH: usize = 32;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ended before a required field.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A length prefix declares more bytes than remain in the buffer.
    #[error("declared length {declared} exceeds remaining {available} bytes")]
    LengthExceedsBuffer { declared: usize, available: usize },

    /// The tag byte is not one of the four known frame kinds.
    #[error("unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    /// An ACK names a kind that cannot be acknowledged (ACK or BATCH).
    #[error("frame kind 0x{0:02X} cannot be acknowledged")]
    InvalidAckTarget(u8),

    /// A varint declares a width above 64 bits.
    #[error("varint of {0} bytes exceeds the 8-byte limit")]
    VarintTooWide(usize),

    /// A frame id does not fit in 32 bits.
    #[error("frame id {0} does not fit in 32 bits")]
    IdOutOfRange(u64),

    /// Bytes remain after a fixed-shape frame (ACK) was fully parsed.
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    /// BATCH frames are nested deeper than [`MAX_BATCH_DEPTH`].
    #[error("batch nesting exceeds {MAX_BATCH_DEPTH} levels")]
    BatchTooDeep,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into a freshly allocated byte vector.
///
/// Encoding cannot fail: every frame value has a representation.
///
/// # Examples
///
/// ```rust
/// use tether_core::protocol::{decode_frame, encode_frame, Frame};
///
/// let frame = Frame::Data { id: 0, payload: b"hi".to_vec() };
/// let bytes = encode_frame(&frame);
/// assert_eq!(bytes, vec![1, 0, 0, b'h', b'i']);
/// assert_eq!(decode_frame(&bytes).unwrap(), frame);
/// ```
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len_hint(frame));
    encode_into(frame, &mut buf);
    buf
}

/// Appends the encoding of `frame` to `buf`.
pub fn encode_into(frame: &Frame, buf: &mut Vec<u8>) {
    buf.push(frame.kind() as u8);
    match frame {
        Frame::Ack { of, id } => {
            buf.push(of.frame_kind() as u8);
            write_varint(u64::from(*id), buf);
        }
        Frame::Data { id, payload } | Frame::Response { id, payload } => {
            write_varint(u64::from(*id), buf);
            buf.extend_from_slice(payload);
        }
        Frame::Batch(members) => {
            for member in members {
                let sub = encode_frame(member);
                write_varint(sub.len() as u64, buf);
                buf.extend_from_slice(&sub);
            }
        }
    }
}

/// Decodes one transport message into a [`Frame`].
///
/// A BATCH decodes to `Frame::Batch` whose members are already flattened:
/// nested batches never appear in the result.
///
/// # Errors
///
/// Returns [`FrameError`] if a declared length exceeds the remaining buffer,
/// a tag byte is unknown, or the frame is otherwise malformed.  A BATCH with a
/// malformed member fails as a whole.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    decode_at_depth(bytes, 0)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn decode_at_depth(bytes: &[u8], depth: usize) -> Result<Frame, FrameError> {
    let (&tag, body) = bytes.split_first().ok_or(FrameError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let kind = FrameKind::try_from(tag).map_err(|_| FrameError::UnknownFrameKind(tag))?;

    match kind {
        FrameKind::Ack => decode_ack(body),
        FrameKind::Data => {
            let (id, payload) = decode_id_and_payload(body)?;
            Ok(Frame::Data { id, payload })
        }
        FrameKind::Response => {
            let (id, payload) = decode_id_and_payload(body)?;
            Ok(Frame::Response { id, payload })
        }
        FrameKind::Batch => decode_batch(body, depth),
    }
}

fn decode_ack(body: &[u8]) -> Result<Frame, FrameError> {
    let (&acked_tag, rest) = body.split_first().ok_or(FrameError::InsufficientData {
        needed: 2,
        available: 1,
    })?;
    let acked = FrameKind::try_from(acked_tag).map_err(|_| FrameError::UnknownFrameKind(acked_tag))?;
    let of = TrackedKind::try_from(acked).map_err(|k| FrameError::InvalidAckTarget(k as u8))?;

    let (id, used) = read_varint(rest)?;
    if used != rest.len() {
        return Err(FrameError::TrailingBytes(rest.len() - used));
    }
    Ok(Frame::Ack { of, id: narrow_id(id)? })
}

fn decode_id_and_payload(body: &[u8]) -> Result<(u32, Vec<u8>), FrameError> {
    let (id, used) = read_varint(body)?;
    Ok((narrow_id(id)?, body[used..].to_vec()))
}

fn decode_batch(body: &[u8], depth: usize) -> Result<Frame, FrameError> {
    if depth >= MAX_BATCH_DEPTH {
        return Err(FrameError::BatchTooDeep);
    }

    let mut members = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let (declared, used) = read_varint(&body[pos..])?;
        pos += used;

        let available = body.len() - pos;
        let sub_len = usize::try_from(declared)
            .ok()
            .filter(|len| *len <= available)
            .ok_or(FrameError::LengthExceedsBuffer {
                declared: usize::try_from(declared).unwrap_or(usize::MAX),
                available,
            })?;

        let member = decode_at_depth(&body[pos..pos + sub_len], depth + 1)?;
        members.extend(member.into_frames());
        pos += sub_len;
    }
    Ok(Frame::Batch(members))
}

// ── Varint helpers ────────────────────────────────────────────────────────────

/// Writes `value` as a length byte (`len - 1`) plus its minimal big-endian bytes.
pub(crate) fn write_varint(value: u64, buf: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    // Zero still needs one byte, hence the cap at 7 skipped bytes.
    let skip = ((value.leading_zeros() / 8) as usize).min(MAX_VARINT_BYTES - 1);
    let len = MAX_VARINT_BYTES - skip;
    buf.push((len - 1) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Reads a length-prefixed varint from the start of `buf`.
///
/// Returns the value and the number of bytes consumed (prefix included).
pub(crate) fn read_varint(buf: &[u8]) -> Result<(u64, usize), FrameError> {
    let (&prefix, rest) = buf.split_first().ok_or(FrameError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let len = prefix as usize + 1;
    if len > MAX_VARINT_BYTES {
        return Err(FrameError::VarintTooWide(len));
    }
    if rest.len() < len {
        return Err(FrameError::LengthExceedsBuffer {
            declared: len,
            available: rest.len(),
        });
    }

    let value = rest[..len]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    Ok((value, len + 1))
}

fn narrow_id(id: u64) -> Result<u32, FrameError> {
    u32::try_from(id).map_err(|_| FrameError::IdOutOfRange(id))
}

fn encoded_len_hint(frame: &Frame) -> usize {
    match frame {
        Frame::Ack { .. } => 7,
        Frame::Data { payload, .. } | Frame::Response { payload, .. } => 6 + payload.len(),
        Frame::Batch(members) => 1 + members.iter().map(|m| 9 + encoded_len_hint(m)).sum::<usize>(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
