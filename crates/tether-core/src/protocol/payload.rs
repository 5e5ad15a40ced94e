//! Pack / unpack capability for user payloads.
//!
//! The protocol engine treats payloads as opaque bytes.  Applications that
//! want typed messages can use [`pack`] and [`unpack`], which serialize any
//! `serde` type with `bincode`.  Both peers must of course agree on the
//! format; raw `Vec<u8>` payloads remain available for anything else.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors produced by the payload serializer.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to pack payload: {0}")]
    Pack(#[source] bincode::Error),
    #[error("failed to unpack payload: {0}")]
    Unpack(#[source] bincode::Error),
}

/// Serializes `value` into an opaque payload.
///
/// # Errors
///
/// Returns [`PayloadError::Pack`] if `value` cannot be serialized.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, PayloadError> {
    bincode::serialize(value).map_err(PayloadError::Pack)
}

/// Deserializes an opaque payload produced by [`pack`].
///
/// # Errors
///
/// Returns [`PayloadError::Unpack`] if the bytes do not describe a `T`.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PayloadError> {
    bincode::deserialize(bytes).map_err(PayloadError::Unpack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ChatLine {
        room: String,
        text: String,
    }

    #[test]
    fn test_pack_then_unpack_struct() {
        let line = ChatLine {
            room: "lobby".to_string(),
            text: "hi".to_string(),
        };
        let bytes = pack(&line).unwrap();
        assert_eq!(unpack::<ChatLine>(&bytes).unwrap(), line);
    }

    #[test]
    fn test_unpack_truncated_bytes_fails() {
        let bytes = pack(&"a longer string").unwrap();
        let result = unpack::<String>(&bytes[..3]);
        assert!(matches!(result, Err(PayloadError::Unpack(_))));
    }
}
