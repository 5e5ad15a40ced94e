//! Ping-based liveness detection.
//!
//! Two timestamps per connection drive the check:
//!
//! - `server`: when this side last sent anything to the peer.
//! - `client`: when this side last heard anything from the peer.
//!
//! If this side has been quiet for half the ping timeout it sends a `ping`,
//! which the peer answers with a `pong`.  If the gap between the last send
//! and the last receive grows past the full timeout, the peer is considered
//! gone and the connection is treated as unexpectedly closed.

use std::time::{Duration, Instant};

/// Last contact in each direction.  `None` until the first event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastContact {
    pub client: Option<Instant>,
    pub server: Option<Instant>,
}

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    Healthy,
    /// Nothing was sent for half the timeout; send a ping.
    PingDue,
    /// The peer has been silent past the timeout.
    TimedOut,
}

/// Stateless liveness rule parameterized by the ping timeout.
#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
    ping_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(ping_timeout: Duration) -> Self {
        Self { ping_timeout }
    }

    pub fn check(&self, contact: &LastContact, now: Instant) -> LivenessVerdict {
        let Some(server) = contact.server else {
            return LivenessVerdict::PingDue;
        };
        if now.saturating_duration_since(server) > self.ping_timeout / 2 {
            return LivenessVerdict::PingDue;
        }
        match contact.client {
            Some(client) if server.saturating_duration_since(client) > self.ping_timeout => {
                LivenessVerdict::TimedOut
            }
            _ => LivenessVerdict::Healthy,
        }
    }
}
