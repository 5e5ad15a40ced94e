//! Application layer: the engine that ties connections, the router and the
//! session registry together.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The domain layer knows what a connection *is*: its state machine, its
//! acknowledgment tables, its replay backlog.  It does not know that many
//! connections exist at once or that sockets come and go.  The application
//! layer coordinates those domain objects on behalf of a transport adapter:
//!
//! - it creates a connection for every accepted socket,
//! - it routes each inbound message to the right connection,
//! - it moves a returning client's socket onto its old session,
//! - it evicts sessions whose reconnect window has passed.
//!
//! Like the domain layer it performs no I/O and never sleeps.  Time is passed
//! in explicitly, which keeps every use case deterministic under test.

pub mod engine;

pub use engine::{lock, Disposition, Engine, SessionHandle};
