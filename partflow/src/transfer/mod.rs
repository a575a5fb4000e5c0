//! Transfer kinds built on the engine.
//!
//! Each kind is a [`LoaderHooks`](crate::loader::LoaderHooks) implementation;
//! `Box<dyn LoaderHooks>` lets the kind be chosen at runtime.

mod callback;
mod download;
mod upload;
mod verify;

pub use callback::{ChannelCallback, TransferCallback, TransferEvent};
pub use download::FileDownloader;
pub use upload::FileUploader;
pub use verify::{IntegrityCheck, DEFAULT_HASH_CHUNK_SIZE, HASHES_PER_QUERY};
