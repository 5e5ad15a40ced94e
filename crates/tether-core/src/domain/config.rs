//! Engine configuration.
//!
//! [`EngineConfig`] is a plain struct: no global state and no environment
//! reads.  The server crate embeds it as the `[engine]` table of its TOML
//! file; every field has a serde default so a partial (or empty) table works.
//!
//! ```toml
//! [engine]
//! reconnect_window_secs = 40
//! sweep_interval_secs = 60
//! ping_interval_ms = 5000
//! ping_timeout_ms = 20000
//! backpressure_threshold = 512
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by [`EngineConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("ping_interval_ms ({interval}) must be shorter than ping_timeout_ms ({timeout})")]
    PingIntervalTooLong { interval: u64, timeout: u64 },
}

/// Runtime settings of the protocol engine.
///
/// Share it behind an `Arc`; connections keep a reference for their whole
/// lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds a dropped session may be resumed.
    #[serde(default = "default_reconnect_window_secs")]
    pub reconnect_window_secs: u64,
    /// Seconds between stale-session sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Milliseconds between liveness checks of each connection.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Milliseconds of peer silence after which a connection is considered dead.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Bytes buffered in the transport at or above which frames are queued.
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
    /// Seconds between retransmissions of an unacknowledged close.
    #[serde(default = "default_close_retry_interval_secs")]
    pub close_retry_interval_secs: u64,
    /// Milliseconds a silent client has before being treated as a new session.
    #[serde(default = "default_handshake_grace_ms")]
    pub handshake_grace_ms: u64,
    /// Resumes allowed per reconnect window before further ones are refused.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_reconnect_window_secs() -> u64 {
    40
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_ping_interval_ms() -> u64 {
    5_000
}
fn default_ping_timeout_ms() -> u64 {
    20_000
}
fn default_backpressure_threshold() -> usize {
    512
}
fn default_close_retry_interval_secs() -> u64 {
    10
}
fn default_handshake_grace_ms() -> u64 {
    3_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconnect_window_secs: default_reconnect_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            backpressure_threshold: default_backpressure_threshold(),
            close_retry_interval_secs: default_close_retry_interval_secs(),
            handshake_grace_ms: default_handshake_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl EngineConfig {
    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn close_retry_interval(&self) -> Duration {
        Duration::from_secs(self.close_retry_interval_secs)
    }

    pub fn handshake_grace(&self) -> Duration {
        Duration::from_millis(self.handshake_grace_ms)
    }

    /// Checks the values that would make the engine misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for zero intervals or a ping interval that is
    /// not shorter than the ping timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("reconnect_window_secs", self.reconnect_window_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("ping_interval_ms", self.ping_interval_ms),
            ("ping_timeout_ms", self.ping_timeout_ms),
            ("close_retry_interval_secs", self.close_retry_interval_secs),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.backpressure_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "backpressure_threshold",
            });
        }
        if self.ping_interval_ms >= self.ping_timeout_ms {
            return Err(ConfigError::PingIntervalTooLong {
                interval: self.ping_interval_ms,
                timeout: self.ping_timeout_ms,
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
