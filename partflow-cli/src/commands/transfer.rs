//! `partflow download` and `partflow upload` over the loopback transport.
//!
//! The remote side is an in-process [`MemoryTransport`]: a download serves
//! the source file from memory, an upload stores parts into memory and is
//! compared with the local file afterwards.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use indicatif::MultiProgress;
use partflow::checksum;
use partflow::config::format_size;
use partflow::loader::{LoaderActor, LocalFileLocation};
use partflow::{FileDownloader, FileUploader, LoaderError, MemoryTransport, ResourceManager};
use tracing::info;

use super::common::{
    check_outcome, install_interrupt_handler, transfer_bar, ProgressCallback, TransferOptions,
};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// File served by the loopback transport
    pub source: PathBuf,

    /// Destination file
    pub output: PathBuf,

    /// Keep bytes already present in the destination
    #[arg(long)]
    pub resume: bool,

    /// Let the loader discover the size while downloading
    #[arg(long)]
    pub unknown_size: bool,

    #[command(flatten)]
    pub options: TransferOptions,
}

/// Arguments for the upload command.
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload
    pub input: PathBuf,

    /// Bytes the remote side already holds (e.g., 1M)
    #[arg(long, value_parser = partflow::config::parse_size)]
    pub resume_from: Option<u64>,

    #[command(flatten)]
    pub options: TransferOptions,
}

/// Run the download command.
pub fn run_download(args: DownloadArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("download");
    let config = runner.config();

    let data = std::fs::read(&args.source)?;
    let size = data.len() as u64;
    let transport = Arc::new(MemoryTransport::new(data).with_latency(args.options.latency()));

    let ready_size = if args.resume {
        std::fs::metadata(&args.output)
            .map(|m| m.len())
            .unwrap_or(0)
            .min(size)
    } else {
        if args.output.exists() {
            std::fs::remove_file(&args.output)?;
        }
        0
    };

    let multi = MultiProgress::new();
    let name = display_name(&args.output);
    let bar = transfer_bar(&multi, &name, (!args.unknown_size).then_some(size));
    let mut hooks = FileDownloader::new(
        &args.output,
        (!args.unknown_size).then_some(size),
        ProgressCallback::new(bar),
    )
    .with_part_size(args.options.part_size(config))
    .with_retry_policy(config.retry_policy())
    .with_verification(args.options.verify);
    if args.unknown_size {
        hooks = hooks.with_expected_size(size);
    }

    println!("partflow v{} download", partflow::VERSION);
    println!("  Source: {} ({})", args.source.display(), format_size(size));
    println!("  Output: {}", args.output.display());
    if ready_size > 0 {
        println!("  Resume: {} already present", format_size(ready_size));
    }
    println!();

    let shutdown = install_interrupt_handler()?;
    let manager = ResourceManager::new(config.total_limit);
    let started = Instant::now();
    let outcome = runner.block_on(async {
        let (actor, handle) = LoaderActor::with_shutdown(
            hooks,
            transport.clone(),
            args.options.loader_config(config),
            shutdown,
        );
        handle.set_resource_manager(&manager, args.options.priority.into())?;
        if ready_size > 0 {
            handle.update_local_file_location(LocalFileLocation::Partial {
                path: args.output.clone(),
                ready_size,
            })?;
        }
        Ok::<_, CliError>(actor.run().await)
    })?;
    let size = check_outcome(outcome)?;

    let elapsed = started.elapsed();
    info!(size, dispatched = transport.dispatched(), ?elapsed, "Download finished");
    println!();
    println!(
        "Downloaded {} in {:.2}s ({} network operations)",
        format_size(size),
        elapsed.as_secs_f64(),
        transport.dispatched()
    );
    Ok(())
}

/// Run the upload command.
pub fn run_upload(args: UploadArgs, verbose: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("upload");
    let config = runner.config();

    let local = std::fs::read(&args.input)?;
    let size = local.len() as u64;
    let held = args.resume_from.unwrap_or(0).min(size);
    let transport = Arc::new(
        MemoryTransport::new(local[..held as usize].to_vec())
            .with_latency(args.options.latency()),
    );

    let multi = MultiProgress::new();
    let bar = transfer_bar(&multi, &display_name(&args.input), Some(size));
    let hooks = FileUploader::new(&args.input, ProgressCallback::new(bar))
        .with_part_size(args.options.part_size(config))
        .with_retry_policy(config.retry_policy())
        .with_verification(args.options.verify);

    println!("partflow v{} upload", partflow::VERSION);
    println!("  Input: {} ({})", args.input.display(), format_size(size));
    if held > 0 {
        println!("  Remote already holds {}", format_size(held));
    }
    println!();

    let shutdown = install_interrupt_handler()?;
    let manager = ResourceManager::new(config.total_limit);
    let outcome = runner.block_on(async {
        let (actor, handle) = LoaderActor::with_shutdown(
            hooks,
            transport.clone(),
            args.options.loader_config(config),
            shutdown,
        );
        handle.set_resource_manager(&manager, args.options.priority.into())?;
        if held > 0 {
            handle.update_local_file_location(LocalFileLocation::Partial {
                path: args.input.clone(),
                ready_size: held,
            })?;
        }
        Ok::<_, CliError>(actor.run().await)
    })?;
    let size = check_outcome(outcome)?;

    let remote = checksum::to_hex(&checksum::digest(&transport.contents()));
    let expected = checksum::to_hex(&checksum::digest(&local));
    println!();
    println!("Uploaded {}", format_size(size));
    println!("  local  sha256 {}", expected);
    println!("  remote sha256 {}", remote);
    if remote != expected {
        return Err(CliError::Transfer(LoaderError::ChecksumMismatch {
            offset: 0,
            expected,
            actual: remote,
        }));
    }
    Ok(())
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
