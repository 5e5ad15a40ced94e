//! Protocol module: frame types, the binary codec, control messages and the
//! payload capability.

pub mod codec;
pub mod control;
pub mod frame;
pub mod payload;
pub mod sequence;

pub use codec::{decode_frame, encode_frame, FrameError};
pub use control::ControlMessage;
pub use frame::{Frame, FrameKind, TrackedKind};
pub use payload::{pack, unpack, PayloadError};
pub use sequence::MessageCounter;
