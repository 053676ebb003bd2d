//! Bridge configuration (railbridge.toml)
//!
//! Handles the per-game configuration file shipped alongside the game
//! executable.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file searched for in the game directory
pub const CONFIG_FILE_NAME: &str = "railbridge.toml";

/// Default exported-symbol prefix of the platform SDK
pub const DEFAULT_SYMBOL_PREFIX: &str = "Rail";

/// Bridge configuration from railbridge.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Game identity
    pub game: GameConfig,

    /// SDK library settings
    pub sdk: SdkConfig,
}

/// Game identity settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GameConfig {
    /// Game id registered with the platform
    pub id: u32,
}

/// SDK library settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SdkConfig {
    /// Path to the SDK library, relative to the game directory
    pub library: PathBuf,

    /// Launch the SDK in local debug mode (running outside the platform
    /// client, which must still be logged in)
    #[serde(default)]
    pub debug: bool,

    /// Exported-symbol prefix; symbols resolve as `{prefix}_{operation}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_prefix: Option<String>,
}

impl BridgeConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `railbridge.toml` in the given directory
    pub fn load_from_directory(dir: &Path) -> ConfigResult<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.game.id == 0 {
            return Err(ConfigError::InvalidValue {
                field: "game.id".to_string(),
                reason: "game id must be non-zero".to_string(),
            });
        }

        if self.sdk.library.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sdk.library".to_string(),
                reason: "library path must not be empty".to_string(),
            });
        }

        if let Some(prefix) = &self.sdk.symbol_prefix {
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(ConfigError::InvalidValue {
                    field: "sdk.symbol_prefix".to_string(),
                    reason: format!("'{}' is not a valid symbol prefix", prefix),
                });
            }
        }

        Ok(())
    }

    /// The exported-symbol prefix, defaulted when not configured
    pub fn symbol_prefix(&self) -> &str {
        self.sdk
            .symbol_prefix
            .as_deref()
            .unwrap_or(DEFAULT_SYMBOL_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_minimal_config() {
        let (_dir, path) = write_config(
            r#"
            [game]
            id = 2001102

            [sdk]
            library = "System/rail_api.dll"
            "#,
        );

        let config = BridgeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.game.id, 2001102);
        assert_eq!(config.sdk.library, PathBuf::from("System/rail_api.dll"));
        assert!(!config.sdk.debug);
        assert_eq!(config.symbol_prefix(), DEFAULT_SYMBOL_PREFIX);
    }

    #[test]
    fn test_load_full_config() {
        let (_dir, path) = write_config(
            r#"
            [game]
            id = 42

            [sdk]
            library = "rail_api.dll"
            debug = true
            symbol_prefix = "Rail2"
            "#,
        );

        let config = BridgeConfig::load_from_file(&path).unwrap();
        assert!(config.sdk.debug);
        assert_eq!(config.symbol_prefix(), "Rail2");
    }

    #[test]
    fn test_load_from_directory() {
        let (dir, _path) = write_config(
            r#"
            [game]
            id = 7

            [sdk]
            library = "rail_api.dll"
            "#,
        );

        let config = BridgeConfig::load_from_directory(dir.path()).unwrap();
        assert_eq!(config.game.id, 7);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load_from_directory(dir.path());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let (_dir, path) = write_config("not valid toml [");
        let result = BridgeConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let (_dir, path) = write_config(
            r#"
            [game]
            id = 7
            name = "unexpected"

            [sdk]
            library = "rail_api.dll"
            "#,
        );

        let result = BridgeConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_zero_game_id_rejected() {
        let (_dir, path) = write_config(
            r#"
            [game]
            id = 0

            [sdk]
            library = "rail_api.dll"
            "#,
        );

        let result = BridgeConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_bad_symbol_prefix_rejected() {
        let (_dir, path) = write_config(
            r#"
            [game]
            id = 7

            [sdk]
            library = "rail_api.dll"
            symbol_prefix = "Rail API"
            "#,
        );

        let result = BridgeConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
