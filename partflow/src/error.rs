//! Error types for the transfer engine.
//!
//! [`LoaderError`] is the terminal status reported through
//! `LoaderHooks::on_error`. [`NetError`] is the failure half of a
//! transport outcome and stays per-part until the engine or a hook
//! decides otherwise.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Failure outcome of a single network operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// The operation was cancelled before a reply arrived.
    #[error("query canceled")]
    Canceled,

    /// No reply arrived in time.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The remote side answered with an error.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    /// The remote side asked us to slow down.
    #[error("flood wait of {retry_after:?}")]
    Flood { retry_after: Duration },
}

impl NetError {
    /// Creates a remote error.
    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Whether repeating the same operation may succeed.
    ///
    /// Remote errors in the 400 range describe the request itself and are
    /// permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Canceled | NetError::Timeout(_) | NetError::Flood { .. } => true,
            NetError::Remote { code, .. } => !(400..500).contains(code),
        }
    }
}

/// Errors that terminate (or may terminate) a transfer.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// `init` could not describe the file.
    #[error("failed to initialize transfer: {0}")]
    Init(String),

    /// The file description is inconsistent.
    #[error("invalid file info: {0}")]
    InvalidFileInfo(String),

    /// More parts than the part-count cap allows.
    #[error("too many parts: {count} (max: {max})")]
    TooManyParts { count: usize, max: usize },

    /// A part reported a size that does not fit the file layout.
    #[error("part {part_id} returned {actual} bytes, expected {expected}")]
    InvalidPartSize {
        part_id: usize,
        expected: u64,
        actual: u64,
    },

    /// Replies disagree about where a file of unknown size ends.
    #[error("part {part_id} puts the end of file at {size}, but data reaches byte {end}")]
    SizeConflict { part_id: usize, size: u64, end: u64 },

    /// A network operation failed.
    #[error("network error: {0}")]
    Network(#[from] NetError),

    /// The hook does not support this operation.
    #[error("unsupported")]
    Unsupported,

    /// Integrity check found different content.
    #[error("checksum mismatch at offset {offset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        offset: u64,
        expected: String,
        actual: String,
    },

    /// Local file access failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A part kept failing past its retry policy.
    #[error("part {part_id} failed after {attempts} attempts")]
    RetriesExhausted { part_id: usize, attempts: u32 },

    /// The owning actor's channel is gone.
    #[error("loader channel closed")]
    ChannelClosed,

    /// Any other non-recoverable condition.
    #[error("{0}")]
    Fatal(String),
}

impl LoaderError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole transfer.
    ///
    /// Only network failures are per-part; a `start_part` hook returning one
    /// of those releases the part instead of failing the transfer.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Network(_))
    }

    /// Whether this is the "operation not supported" marker.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported)
    }
}
