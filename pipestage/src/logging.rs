//! Logging setup for the command line.
//!
//! Human-readable logs go to stderr so stdout stays clean for
//! `get-config`. An optional log file receives the same events without
//! ANSI colors, appended through a non-blocking writer.
//!
//! ```no_run
//! let _guard = pipestage::logging::init("debug", None).expect("logging");
//! tracing::info!("ready");
//! ```

use std::fs::OpenOptions;
use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _};

/// Errors while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level '{level}': {message}")]
    Level { level: String, message: String },

    #[error("Cannot open log file '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    Init(String),
}

fn filter(level: &str) -> Result<EnvFilter, LoggingError> {
    // RUST_LOG wins over the command line
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(level.to_lowercase()).map_err(|e| LoggingError::Level {
            level: level.to_string(),
            message: e.to_string(),
        })
    })
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// whole program.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, LoggingError> {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter(level)?);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.display().to_string(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .with_filter(filter(level)?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    tracing::debug!("logging initialized at level {}", level);
    Ok(guard)
}
