//! Subcommand implementations.

pub mod bench;
pub mod common;
pub mod config;
pub mod transfer;
