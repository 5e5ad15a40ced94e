//! tether-server library crate.
//!
//! Serves tether sessions over WebSocket.  The protocol itself (framing,
//! acknowledgments, resume) is implemented by `tether-core`; this crate
//! supplies the sockets, the timers and the demo application.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! WebSocket client
//!         ↕
//! [tether-server]
//!   ├── domain/           ServerConfig
//!   ├── application/      EchoHandler (session callbacks)
//!   └── infrastructure/
//!         ├── ws_server/     accept loop, per-socket tasks, expiry timers
//!         ├── ws_transport/  Transport impl + writer task
//!         └── storage/       TOML config loading
//!         ↕
//! [tether-core] Engine
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `tether-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: what the server does with session events.
pub mod application;

/// Infrastructure layer: WebSocket server and config file.
pub mod infrastructure;
