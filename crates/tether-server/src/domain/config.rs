//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for the server's runtime
//! settings.  It is read from a TOML file (see
//! [`crate::infrastructure::storage`]) and then overridden by CLI flags.
//!
//! ```toml
//! bind_addr = "0.0.0.0:9300"
//! log_level = "info"
//!
//! [engine]
//! reconnect_window_secs = 40
//! backpressure_threshold = 512
//! ```
//!
//! Every field has a serde default, so an empty file (or no file at all) is
//! a valid configuration.

use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tether_core::EngineConfig;

/// All runtime configuration for the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Protocol timers and limits.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9300))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            engine: EngineConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_port_is_9300() {
        // Arrange / Act
        let cfg = ServerConfig::default();
        // Assert
        assert_eq!(cfg.bind_addr.port(), 9300);
    }

    #[test]
    fn test_default_log_level_is_info() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_engine_table_keeps_other_defaults() {
        // Arrange
        let text = r#"
            bind_addr = "127.0.0.1:7000"

            [engine]
            reconnect_window_secs = 5
        "#;

        // Act
        let cfg: ServerConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:7000");
        assert_eq!(cfg.engine.reconnect_window_secs, 5);
        assert_eq!(
            cfg.engine.backpressure_threshold,
            EngineConfig::default().backpressure_threshold
        );
    }

    #[test]
    fn test_invalid_bind_addr_is_rejected() {
        let result: Result<ServerConfig, _> = toml::from_str(r#"bind_addr = "not an address""#);
        assert!(result.is_err());
    }
}
