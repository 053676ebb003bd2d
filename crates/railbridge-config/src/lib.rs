//! Railbridge Configuration System
//!
//! Provides configuration for a railbridge deployment:
//! - Game identity (the id registered with the platform)
//! - SDK library location and launch mode
//! - Symbol naming overrides
//!
//! Configuration lives in `railbridge.toml` next to the game executable and
//! is loaded once at bridge startup.
//!
//! # Example
//!
//! ```no_run
//! use railbridge_config::BridgeConfig;
//! use std::path::Path;
//!
//! let config = BridgeConfig::load_from_directory(Path::new(".")).unwrap();
//! assert_ne!(config.game.id, 0);
//! ```

pub mod bridge;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Missing required field '{field}' in {file}")]
    MissingField { field: String, file: PathBuf },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use bridge::{BridgeConfig, GameConfig, SdkConfig};
