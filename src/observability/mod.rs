//! Observability: structured logging setup.
//!
//! The library only emits `tracing` events and `metrics` samples; installing
//! a subscriber or a metrics recorder is left to the host. [`init_logging`]
//! is a convenience for hosts that want the default fmt subscriber.

mod logging;

pub use logging::{LOG_FILTER_ENV, LOG_FORMAT_ENV, LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

/// Installs the global `tracing` subscriber.
///
/// Lines go to the configured file, appended, or to stderr. ANSI colours are
/// only used on stderr.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a global subscriber is already
/// installed or the log file cannot be opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_ansi(config.file.is_none())
            .with_target(true)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .try_init()
        .map_err(|e| Error::OperationFailed {
            operation: "logging_init".to_string(),
            cause: e.to_string(),
        })
}

/// Opens a log file for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: e.to_string(),
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lazarus.log");
        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"hello\n").unwrap();
        file.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_init_logging_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            filter: Some("lazarus=debug".to_string()),
            format: LogFormat::Json,
            file: Some(dir.path().join("lazarus.log")),
        };

        // Only this test installs a subscriber, so the first call succeeds.
        init_logging(&config).unwrap();
        assert!(dir.path().join("lazarus.log").exists());

        let err = init_logging(&LoggingConfig::default()).unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "logging_init"));
    }
}
