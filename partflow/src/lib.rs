//! partflow - Parallel, resumable file transfers over a pluggable transport
//!
//! A file is split into fixed-size parts. A [`FileLoader`] schedules one
//! network query per part under a byte budget, optionally delivers results
//! in strict order, resumes from a partial local copy, and verifies the
//! result before reporting success. Loaders sharing a [`ResourceManager`]
//! split one global budget by priority.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use partflow::{ChannelCallback, FileDownloader, LoaderActor, LoaderConfig, MemoryTransport};
//!
//! let transport = Arc::new(MemoryTransport::new(vec![0u8; 4096]));
//! let (callback, _events) = ChannelCallback::new();
//! let hooks = FileDownloader::new("out.bin", Some(4096), callback).with_verification(true);
//! let (actor, _handle) = LoaderActor::new(hooks, transport, LoaderConfig::default());
//! let outcome = actor.spawn().await?;
//! ```

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod checksum;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod net;
pub mod ordered;
pub mod parts;
pub mod policy;
pub mod resource;
pub mod transfer;

pub use config::{ConfigFile, LoaderConfig};
pub use error::{LoaderError, LoaderResult, NetError};
pub use loader::{
    run_all, FileInfo, FileLoader, LoaderActor, LoaderHandle, LoaderHooks, LoaderOutcome,
    LoaderProgress, LocalFileLocation,
};
pub use net::{MemoryTransport, NetQuery, NetRequest, Transport};
pub use policy::{Priority, RetryPolicy};
pub use resource::{ResourceManager, ResourceState};
pub use transfer::{ChannelCallback, FileDownloader, FileUploader, TransferCallback, TransferEvent};
