//! `partflow bench` - many concurrent transfers sharing one budget.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use indicatif::MultiProgress;
use partflow::config::{format_size, parse_size};
use partflow::loader::{run_all, LoaderActor, LoaderHooks, LoaderOutcome};
use partflow::{FileDownloader, FileUploader, MemoryTransport, ResourceManager};
use tracing::{info, warn};

use super::common::{install_interrupt_handler, transfer_bar, ProgressCallback, TransferOptions};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the bench command.
#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Number of concurrent transfers
    #[arg(long, default_value_t = 4)]
    pub files: usize,

    /// Size of each file (e.g., 8M)
    #[arg(long, value_parser = parse_size, default_value = "4M")]
    pub size: u64,

    /// Shared in-flight budget; defaults to resources.total_limit
    #[arg(long, value_parser = parse_size)]
    pub total_limit: Option<u64>,

    /// Make every other transfer an upload
    #[arg(long)]
    pub with_uploads: bool,

    /// Scratch directory; defaults to the user cache directory
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Keep the scratch files afterwards
    #[arg(long)]
    pub keep: bool,

    #[command(flatten)]
    pub options: TransferOptions,
}

/// Deterministic content, different per file.
fn pattern(index: usize, len: u64) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31).wrapping_add(index as u64 * 7) % 251) as u8)
        .collect()
}

fn scratch_dir(args: &BenchArgs) -> PathBuf {
    args.dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("partflow")
            .join("bench")
    })
}

struct Job {
    name: String,
    path: PathBuf,
    expected: Vec<u8>,
    transport: Arc<MemoryTransport>,
    upload: bool,
}

impl Job {
    fn verify(&self) -> Result<bool, CliError> {
        let actual = if self.upload {
            self.transport.contents()
        } else {
            std::fs::read(&self.path)?
        };
        Ok(actual == self.expected)
    }
}

/// Run the bench command.
pub fn run(args: BenchArgs, verbose: bool) -> Result<(), CliError> {
    if args.files == 0 {
        return Err(CliError::Config("--files must be at least 1".to_string()));
    }
    let runner = CliRunner::new(verbose)?;
    runner.log_startup("bench");
    let config = runner.config();

    let dir = scratch_dir(&args);
    std::fs::create_dir_all(&dir)?;
    let total_limit = args.total_limit.unwrap_or(config.total_limit);
    let manager = ResourceManager::new(total_limit);
    let shutdown = install_interrupt_handler()?;
    let multi = MultiProgress::new();

    println!("partflow v{} bench", partflow::VERSION);
    println!(
        "  {} transfers of {} sharing {}",
        args.files,
        format_size(args.size),
        format_size(total_limit)
    );
    println!("  Scratch: {}", dir.display());
    println!();

    let mut jobs = Vec::with_capacity(args.files);
    let mut actors: Vec<LoaderActor<Box<dyn LoaderHooks>>> = Vec::with_capacity(args.files);
    for index in 0..args.files {
        let upload = args.with_uploads && index % 2 == 1;
        let data = pattern(index, args.size);
        let name = format!("{}-{}", if upload { "up" } else { "down" }, index);
        let path = dir.join(format!("{}.bin", name));
        let bar = transfer_bar(&multi, &name, Some(args.size));
        let callback = ProgressCallback::new(bar);

        let (transport, hooks): (_, Box<dyn LoaderHooks>) = if upload {
            std::fs::write(&path, &data)?;
            let hooks = FileUploader::new(&path, callback)
                .with_part_size(args.options.part_size(config))
                .with_retry_policy(config.retry_policy())
                .with_verification(args.options.verify);
            (MemoryTransport::new(Vec::new()), Box::new(hooks) as Box<dyn LoaderHooks>)
        } else {
            let hooks = FileDownloader::new(&path, Some(args.size), callback)
                .with_part_size(args.options.part_size(config))
                .with_retry_policy(config.retry_policy())
                .with_verification(args.options.verify);
            (MemoryTransport::new(data.clone()), Box::new(hooks) as Box<dyn LoaderHooks>)
        };
        let transport = Arc::new(transport.with_latency(args.options.latency()));

        let (actor, handle) = LoaderActor::with_shutdown(
            hooks,
            transport.clone(),
            args.options.loader_config(config),
            shutdown.clone(),
        );
        handle.set_resource_manager(&manager, args.options.priority.into())?;
        actors.push(actor);
        jobs.push(Job {
            name,
            path,
            expected: data,
            transport,
            upload,
        });
    }

    let started = Instant::now();
    let outcomes = runner.block_on(run_all(actors));
    let elapsed = started.elapsed();

    println!();
    let mut failures = 0;
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        match outcome {
            LoaderOutcome::Completed(_) if job.verify()? => {
                println!("  {:<10} ok", job.name);
            }
            LoaderOutcome::Completed(_) => {
                failures += 1;
                println!("  {:<10} content differs", job.name);
            }
            LoaderOutcome::Failed(error) => {
                failures += 1;
                println!("  {:<10} failed: {}", job.name, error);
            }
            LoaderOutcome::Stopped => {
                failures += 1;
                println!("  {:<10} stopped", job.name);
            }
        }
    }

    let total = args.size * args.files as u64;
    let rate = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / (1024.0 * 1024.0);
    info!(files = args.files, total, ?elapsed, failures, "Bench finished");
    println!();
    println!(
        "Moved {} in {:.2}s ({:.1} MiB/s)",
        format_size(total),
        elapsed.as_secs_f64(),
        rate
    );

    if !args.keep {
        cleanup(&jobs);
    }

    if shutdown.is_cancelled() {
        return Err(CliError::Interrupted);
    }
    if failures > 0 {
        return Err(CliError::Incomplete(format!(
            "{} of {} transfers failed",
            failures, args.files
        )));
    }
    Ok(())
}

fn cleanup(jobs: &[Job]) {
    for job in jobs {
        remove_quietly(&job.path);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_patterns_differ_per_file() {
        assert_ne!(pattern(0, 64), pattern(1, 64));
        assert_eq!(pattern(3, 64), pattern(3, 64));
    }

    proptest! {
        #[test]
        fn prop_pattern_has_requested_length(index in 0usize..16, len in 0u64..4096) {
            prop_assert_eq!(pattern(index, len).len() as u64, len);
        }
    }
}
