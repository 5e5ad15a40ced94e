//! Loads [`ServerConfig`] from a TOML file.
//!
//! A missing file is not an error: the server starts with defaults, which
//! lets it run on first launch without any setup.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::ServerConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads `ServerConfig` from `path`, returning `ServerConfig::default()` if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigFileError::Io`] for file-system errors other than "not
/// found", and [`ConfigFileError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigFileError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: ServerConfig = toml::from_str(&content)?;
            debug!("loaded config from {}", path.display());
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no config at {}; using defaults", path.display());
            Ok(ServerConfig::default())
        }
        Err(e) => Err(ConfigFileError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
