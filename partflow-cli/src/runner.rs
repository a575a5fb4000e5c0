//! Shared setup for commands that run transfers.

use std::future::Future;

use partflow::config::ConfigFile;
use partflow::logging::{init_logging, LogGuard};
use tokio::runtime::Runtime;
use tracing::info;

use crate::error::CliError;

/// Loaded config, installed logger and the async runtime.
pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    _log_guard: Option<LogGuard>,
}

impl CliRunner {
    /// Loads the config file and installs logging.
    ///
    /// `verbose` raises the configured level to `debug`.
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let mut logging = config.logging.clone();
        if verbose {
            logging = logging.with_level("debug");
        }
        let log_guard = init_logging(&logging)?;
        let runtime = Runtime::new().map_err(CliError::Runtime)?;

        Ok(Self {
            config,
            runtime,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = partflow::VERSION,
            command,
            total_limit = self.config.total_limit,
            "partflow starting"
        );
    }

    /// Runs a future to completion on the runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
