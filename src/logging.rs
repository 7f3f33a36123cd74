//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level. Console output is always on. When a log directory is configured, a
//! daily-rotated file is written through a non-blocking appender; the returned
//! [`WorkerGuard`] must be kept alive for as long as file logging should
//! flush.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{PadEmulatorError, Result};

/// Initialize the logging system based on configuration
///
/// # Errors
///
/// Returns error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_layer, guard) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| PadEmulatorError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_file_then_reinit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig {
            level: "debug".to_string(),
            log_dir: log_dir.to_string_lossy().into_owned(),
            file_prefix: "test.log".to_string(),
        };

        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        assert!(log_dir.is_dir());

        // Only one global subscriber per process
        let second = init(&LoggingConfig::default());
        assert!(matches!(second, Err(PadEmulatorError::Logging(_))));
    }
}
