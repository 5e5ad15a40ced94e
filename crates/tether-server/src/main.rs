//! tether server entry point.
//!
//! Accepts WebSocket clients and runs reliable tether sessions for them.  The
//! bundled application echoes every message back as a response.
//!
//! # Usage
//!
//! ```text
//! tether-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>              TOML config file [default: tether.toml]
//!   --bind <ADDR>                Listener address, e.g. 0.0.0.0:9300
//!   --log-level <FILTER>         Log filter when RUST_LOG is unset
//!   --reconnect-window <SECS>    How long a dropped session may resume
//!   --backpressure <BYTES>       Buffered bytes at which sends are queued
//! ```
//!
//! Flags override values from the config file; a missing config file means
//! defaults.
//!
//! # Environment variable overrides
//!
//! | Variable                   | Flag                  |
//! |----------------------------|-----------------------|
//! | `TETHER_CONFIG`            | `--config`            |
//! | `TETHER_BIND`              | `--bind`              |
//! | `TETHER_LOG_LEVEL`         | `--log-level`         |
//! | `TETHER_RECONNECT_WINDOW`  | `--reconnect-window`  |
//! | `TETHER_BACKPRESSURE`      | `--backpressure`      |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_server::domain::ServerConfig;
use tether_server::infrastructure::{load_config, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Reliable message sessions over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "tether-server", about = "Reliable message sessions over WebSocket", version)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "tether.toml", env = "TETHER_CONFIG")]
    config: PathBuf,

    /// Address and port to listen on.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<SocketAddr>,

    /// Log filter used when `RUST_LOG` is not set (e.g. `info`, `tether_core=debug`).
    #[arg(long, env = "TETHER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Seconds a disconnected session may be resumed.
    #[arg(long, env = "TETHER_RECONNECT_WINDOW")]
    reconnect_window: Option<u64>,

    /// Buffered bytes at or above which outgoing frames are queued.
    #[arg(long, env = "TETHER_BACKPRESSURE")]
    backpressure: Option<usize>,
}

impl Cli {
    /// Loads the config file and applies the flags on top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting engine settings are invalid.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = load_config(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(secs) = self.reconnect_window {
            config.engine.reconnect_window_secs = secs;
        }
        if let Some(bytes) = self.backpressure {
            config.engine.backpressure_threshold = bytes;
        }

        config
            .engine
            .validate()
            .context("invalid engine configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "tether server starting: bind={}, reconnect_window={}s",
        config.bind_addr, config.engine.reconnect_window_secs
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("tether server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_config() -> String {
        std::env::temp_dir()
            .join("tether-server-no-such-config.toml")
            .display()
            .to_string()
    }

    #[test]
    fn test_cli_defaults() {
        // Arrange / Act
        let cli = Cli::parse_from(["tether-server"]);

        // Assert
        assert_eq!(cli.config, PathBuf::from("tether.toml"));
        assert!(cli.bind.is_none());
        assert!(cli.reconnect_window.is_none());
    }

    #[test]
    fn test_cli_bind_override() {
        let cli = Cli::parse_from(["tether-server", "--bind", "127.0.0.1:9000"]);
        assert_eq!(cli.bind, Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn test_cli_rejects_invalid_bind() {
        let result = Cli::try_parse_from(["tether-server", "--bind", "not.an.ip"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file_gives_defaults() {
        let cli = Cli::parse_from(["tether-server", "--config", missing_config().as_str()]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        // Arrange
        let cli = Cli::parse_from([
            "tether-server",
            "--config",
            missing_config().as_str(),
            "--bind",
            "127.0.0.1:7001",
            "--log-level",
            "debug",
            "--reconnect-window",
            "12",
            "--backpressure",
            "4096",
        ]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr.port(), 7001);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.engine.reconnect_window_secs, 12);
        assert_eq!(config.engine.backpressure_threshold, 4096);
    }

    #[test]
    fn test_zero_reconnect_window_is_rejected() {
        let cli = Cli::parse_from([
            "tether-server",
            "--config",
            missing_config().as_str(),
            "--reconnect-window",
            "0",
        ]);

        let result = cli.into_server_config();

        assert!(result.is_err());
    }
}
