//! Application layer for tether-server.
//!
//! Holds the connection handler the binary runs.  The handler only reacts to
//! session events; it knows nothing about sockets or Tokio.

pub mod echo;

pub use echo::{EchoHandler, SessionStats};
