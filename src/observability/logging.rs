//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_FILTER_ENV: &str = "LAZARUS_LOG";

/// Environment variable selecting the log format (`pretty` or `json`).
pub const LOG_FORMAT_ENV: &str = "LAZARUS_LOG_FORMAT";

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "lazarus=debug";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to `Pretty`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Filter directive (`EnvFilter` syntax).
    pub filter: Option<String>,
    /// Output format.
    pub format: LogFormat,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        Self::from_settings(None, verbose)
    }

    /// Builds logging configuration from config settings with env overrides.
    ///
    /// Precedence for the filter: `LAZARUS_LOG`, then `RUST_LOG`, then the
    /// config file, then `lazarus=debug` when `verbose`, then `warn`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let filter = std::env::var(LOG_FILTER_ENV)
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .or_else(|| settings.and_then(|s| s.filter.clone()))
            .or_else(|| verbose.then(|| VERBOSE_FILTER.to_string()));

        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map_or_else(LogFormat::default, |f| LogFormat::parse(&f));

        let file = settings.and_then(|s| s.file.as_ref()).map(PathBuf::from);

        Self {
            filter,
            format,
            file,
        }
    }

    /// Builds the `EnvFilter` for this configuration.
    ///
    /// An unparseable directive falls back to the default filter.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        let directive = self.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}
