//! Domain layer of the session protocol.
//!
//! Pure protocol logic with no I/O: connections and their state machine,
//! the router that feeds them, liveness rules and the session registry.
//!
//! # Sub-modules
//!
//! - **`connection`** – One logical session: ids, acknowledgment and dedup
//!   tables, send queue, replay backlog, close handshake.
//! - **`router`** – Interprets an inbound transport message against a
//!   connection.
//! - **`registry`** – All known sessions plus resume bookkeeping and the
//!   stale-session sweep.
//! - **`liveness`** – Ping / timeout rule.
//! - **`transport`** – The trait a socket adapter implements.
//! - **`handler`** – Application callbacks.

pub mod close;
pub mod config;
pub mod connection;
pub mod handler;
pub mod identity;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod transport;
