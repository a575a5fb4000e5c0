//! CLI error type.

use partflow::config::ConfigError;
use partflow::logging::LoggingError;
use partflow::LoaderError;
use thiserror::Error;

/// Errors surfaced to the user by the `partflow` binary.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] LoaderError),

    #[error("{0}")]
    Incomplete(String),

    #[error("Transfer interrupted")]
    Interrupted,
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_messages() {
        assert_eq!(CliError::Interrupted.to_string(), "Transfer interrupted");
        assert_eq!(
            CliError::Config("bad key".into()).to_string(),
            "Configuration error: bad key"
        );
        assert_eq!(
            CliError::from(LoaderError::Unsupported).to_string(),
            "Transfer failed: unsupported"
        );
    }

    #[test]
    fn test_sources_are_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads");
        assert!(CliError::Runtime(io).source().is_some());
        assert!(CliError::from(LoaderError::Unsupported).source().is_some());
        assert!(CliError::Incomplete("1 of 2 transfers failed".into())
            .source()
            .is_none());
    }
}
