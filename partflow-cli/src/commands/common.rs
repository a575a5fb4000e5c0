//! Arguments and helpers shared by the transfer commands.

use std::time::Duration;

use clap::{Args, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use partflow::config::{parse_size, ConfigFile};
use partflow::loader::{LoaderOutcome, LoaderProgress};
use partflow::transfer::TransferCallback;
use partflow::{LoaderConfig, LoaderError, Priority};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CliError;

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:<12} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";

/// Scheduling priority for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PriorityArg {
    Interactive,
    Normal,
    Background,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Interactive => Priority::INTERACTIVE,
            PriorityArg::Normal => Priority::NORMAL,
            PriorityArg::Background => Priority::BACKGROUND,
        }
    }
}

/// Options accepted by every transfer command.
#[derive(Debug, Clone, Args)]
pub struct TransferOptions {
    /// Part size (e.g., 64K); defaults to the config, then automatic
    #[arg(long, value_parser = parse_size)]
    pub part_size: Option<u64>,

    /// Deliver parts in ascending order
    #[arg(long)]
    pub ordered: bool,

    /// Verify the result against remote SHA-256 digests
    #[arg(long)]
    pub verify: bool,

    /// Artificial latency per network operation, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Scheduling priority within the shared budget
    #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
    pub priority: PriorityArg,
}

impl TransferOptions {
    /// Part size from the command line, else the config file.
    pub fn part_size(&self, config: &ConfigFile) -> u64 {
        self.part_size.unwrap_or(config.part_size)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Loader settings from the config file, with `--ordered` on top.
    pub fn loader_config(&self, config: &ConfigFile) -> LoaderConfig {
        let loader = config.loader_config();
        let ordered = loader.ordered || self.ordered;
        loader.with_ordered(ordered)
    }
}

/// Creates a byte progress bar for one transfer.
pub fn transfer_bar(multi: &MultiProgress, name: &str, size: Option<u64>) -> ProgressBar {
    let bar = match size {
        Some(size) => multi.add(ProgressBar::new(size)),
        None => multi.add(ProgressBar::no_length()),
    };
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_prefix(name.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// [`TransferCallback`] drawing on a progress bar.
pub struct ProgressCallback {
    bar: ProgressBar,
}

impl ProgressCallback {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl TransferCallback for ProgressCallback {
    fn on_progress(&mut self, progress: LoaderProgress) {
        if progress.is_ready {
            self.bar.set_message("verifying");
        }
        self.bar.set_position(progress.ready_size);
    }

    fn on_ok(&mut self, size: u64) {
        self.bar.set_length(size);
        self.bar.set_position(size);
        self.bar.finish_with_message("done");
    }

    fn on_error(&mut self, error: &LoaderError) {
        self.bar.abandon_with_message(format!("failed: {}", error));
    }
}

/// Cancels the returned token on Ctrl+C.
pub fn install_interrupt_handler() -> Result<CancellationToken, CliError> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        debug!("Interrupt received");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
    Ok(token)
}

/// Turns a loader outcome into the command result.
pub fn check_outcome(outcome: LoaderOutcome) -> Result<u64, CliError> {
    match outcome {
        LoaderOutcome::Completed(size) => Ok(size),
        LoaderOutcome::Failed(error) => Err(CliError::Transfer(error)),
        LoaderOutcome::Stopped => Err(CliError::Interrupted),
    }
}
