//! partflow CLI - parallel, resumable file transfers
//!
//! Transfers run over the in-process loopback transport, which makes the
//! binary a way to exercise the engine end to end: part scheduling, the
//! shared budget, resume and verification.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::bench::BenchArgs;
use commands::config::ConfigCommands;
use commands::transfer::{DownloadArgs, UploadArgs};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "partflow", version, about = "Parallel, resumable file transfers")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a file through the loopback transport
    Download(DownloadArgs),

    /// Upload a file through the loopback transport
    Upload(UploadArgs),

    /// Run several transfers at once under one shared budget
    Bench(BenchArgs),

    /// View or change settings
    Config {
        /// Config file to use instead of the default location
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Download(args) => commands::transfer::run_download(args, cli.verbose),
        Commands::Upload(args) => commands::transfer::run_upload(args, cli.verbose),
        Commands::Bench(args) => commands::bench::run(args, cli.verbose),
        Commands::Config { file, command } => commands::config::run(command, file),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_download() {
        let cli = Cli::try_parse_from([
            "partflow",
            "download",
            "in.bin",
            "out.bin",
            "--part-size",
            "64K",
            "--verify",
            "--resume",
        ])
        .unwrap();
        match cli.command {
            Commands::Download(args) => {
                assert_eq!(args.options.part_size, Some(64 * 1024));
                assert!(args.options.verify);
                assert!(args.resume);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_bench_priority() {
        let cli = Cli::try_parse_from([
            "partflow",
            "-v",
            "bench",
            "--files",
            "3",
            "--priority",
            "background",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Bench(args) => {
                assert_eq!(args.files, 3);
                assert_eq!(args.size, 4 * 1024 * 1024);
                assert_eq!(args.options.priority, commands::common::PriorityArg::Background);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_size_rejected() {
        assert!(Cli::try_parse_from(["partflow", "bench", "--size", "huge"]).is_err());
    }
}
