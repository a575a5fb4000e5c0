//! Logging setup.
//!
//! Installs a global `tracing` subscriber writing to stderr and, when a
//! directory is configured, to a daily rolling file through a non-blocking
//! writer. `RUST_LOG` overrides the configured level.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::{self, time::LocalTime};
use tracing_subscriber::prelude::*;

/// Default filter when neither the config nor `RUST_LOG` say otherwise.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default name of the log file inside the log directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "partflow.log";

const TIMESTAMP_FORMAT: &str = "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]";

/// Keeps the background log writer alive; flushes on drop.
pub type LogGuard = WorkerGuard;

/// Errors from [`init_logging`].
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid timestamp format: {0}")]
    TimeFormat(#[from] time::error::InvalidFormatDescription),

    #[error("failed to create log directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global logger is already installed")]
    AlreadyInstalled,
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `partflow=debug`.
    pub level: String,
    /// Directory for the rolling log file; `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            file_name: DEFAULT_LOG_FILE_NAME.to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Parses filter directives.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
        filter: level.to_string(),
        source,
    })
}

/// Installs the global subscriber.
///
/// Returns the file writer's guard when logging to a file; dropping it
/// flushes and stops the background writer, so keep it alive until exit.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };
    let timer = LocalTime::new(time::format_description::parse(TIMESTAMP_FORMAT)?);
    let console = fmt::layer()
        .with_timer(timer.clone())
        .with_target(false)
        .with_writer(std::io::stderr);

    let Some(directory) = &config.directory else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInstalled)?;
        return Ok(None);
    };

    std::fs::create_dir_all(directory).map_err(|source| LoggingError::Directory {
        path: directory.clone(),
        source,
    })?;
    let appender = tracing_appender::rolling::daily(directory, &config.file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_timer(timer)
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)?;
    Ok(Some(guard))
}
