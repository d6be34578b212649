//! Configuration management.

mod retention;

pub use retention::{
    DEFAULT_RETENTION_DAYS, NEVER, RETENTION_DAYS_ENV, RetentionConfig, RetentionSection,
    RetentionSetting,
};

use crate::observability::LoggingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable for the `SQLite` database path.
pub const DATABASE_PATH_ENV: &str = "LAZARUS_DATABASE_PATH";

/// Main configuration for lazarus.
#[derive(Debug, Clone, Default)]
pub struct LazarusConfig {
    /// Retention policy, resolved per model at registration.
    pub retention: RetentionConfig,
    /// Path to the `SQLite` database (`None` for in-memory).
    pub database_path: Option<PathBuf>,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub database_path: Option<String>,
    /// Retention section.
    pub retention: Option<RetentionSection>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

/// `[logging]` section in the config file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `lazarus=debug`.
    pub filter: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Optional log file path.
    pub file: Option<String>,
}

impl LazarusConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds configuration from defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Loads configuration from a file path, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a
    /// retention value is neither a day count nor `never`.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the platform config directory
    /// (`<config_dir>/lazarus/config.toml`).
    ///
    /// Returns environment-based defaults if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::from_env();
        };

        let path = base_dirs.config_dir().join("lazarus").join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file"),
            }
        }

        Self::from_env()
    }

    /// Converts a `ConfigFile` to `LazarusConfig`.
    fn from_config_file(file: ConfigFile) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = file.database_path {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(section) = file.retention {
            config.retention = RetentionConfig::from_section(section)?;
        }
        config.logging = LoggingConfig::from_settings(file.logging.as_ref(), false);

        Ok(config)
    }

    fn apply_env(&mut self) {
        self.retention.apply_env();
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.is_empty() {
                self.database_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the retention configuration.
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }
}
