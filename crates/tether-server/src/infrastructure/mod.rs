//! Infrastructure layer for tether-server.
//!
//! Everything that touches the outside world: the TCP listener, WebSocket
//! framing, per-socket Tokio tasks, timers, and the config file.
//!
//! # What does NOT belong here?
//!
//! - Protocol rules (those live in `tether-core`)
//! - Application behaviour on messages (that is the application layer)

pub mod storage;
pub mod ws_server;
pub mod ws_transport;

pub use storage::{load_config, ConfigFileError};
pub use ws_server::{run_server, serve};
