//! Value types exchanged between the engine and its hooks.

use std::fmt;
use std::path::PathBuf;

use crate::net::NetQuery;

/// File description returned by `LoaderHooks::init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Final size, or negative when not known yet.
    pub size: i64,
    /// Best guess of the size while it is not final.
    pub expected_size: i64,
    /// Whether `size` is the final size.
    pub is_size_final: bool,
    /// Part size in bytes; zero picks one automatically.
    pub part_size: u64,
    /// Parts already transferred in an earlier session.
    pub ready_parts: Vec<usize>,
    /// Whether the part count is capped.
    pub use_part_count_limit: bool,
}

impl FileInfo {
    /// A file of known, final size.
    pub fn new(size: i64, part_size: u64) -> Self {
        Self {
            size,
            expected_size: size,
            is_size_final: true,
            part_size,
            ready_parts: Vec::new(),
            use_part_count_limit: true,
        }
    }

    /// A file whose size is discovered while transferring.
    pub fn unknown_size(expected_size: i64, part_size: u64) -> Self {
        Self {
            size: -1,
            expected_size,
            is_size_final: false,
            part_size,
            ready_parts: Vec::new(),
            use_part_count_limit: true,
        }
    }

    pub fn with_ready_parts(mut self, ready_parts: Vec<usize>) -> Self {
        self.ready_parts = ready_parts;
        self
    }

    pub fn without_part_count_limit(mut self) -> Self {
        self.use_part_count_limit = false;
        self
    }

    /// The size as unsigned, if it is not negative.
    pub fn known_size(&self) -> Option<u64> {
        u64::try_from(self.size).ok()
    }
}

/// Contiguous prefix found in a local copy of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefixInfo {
    pub size: u64,
    /// Whether the prefix is complete and trusted.
    pub is_ready: bool,
}

impl PrefixInfo {
    pub fn ready(size: u64) -> Self {
        Self {
            size,
            is_ready: true,
        }
    }
}

/// Outcome of one integrity-check scheduling step.
#[derive(Debug, Default)]
pub struct CheckInfo {
    /// Whether checking must continue before the transfer may complete.
    pub need_check: bool,
    /// Prefix already verified.
    pub checked_prefix_size: u64,
    /// Verification queries to dispatch now.
    pub queries: Vec<NetQuery>,
    /// Whether the checked prefix advanced and progress should be reported.
    pub changed: bool,
}

/// Snapshot passed to `LoaderHooks::on_progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderProgress {
    pub part_count: usize,
    pub part_size: u64,
    pub ready_part_count: usize,
    pub is_ready: bool,
    pub ready_size: u64,
}

impl LoaderProgress {
    /// Completion as a percentage of parts.
    pub fn percent(&self) -> f64 {
        if self.part_count == 0 {
            return if self.is_ready { 100.0 } else { 0.0 };
        }
        self.ready_part_count as f64 / self.part_count as f64 * 100.0
    }
}

impl fmt::Display for LoaderProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} parts, {} bytes{}",
            self.ready_part_count,
            self.part_count,
            self.ready_size,
            if self.is_ready { ", ready" } else { "" }
        )
    }
}

/// Where a local copy of the file lives, as announced by the owner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocalFileLocation {
    /// No local copy.
    #[default]
    Empty,
    /// A local copy whose first `ready_size` bytes are present.
    Partial { path: PathBuf, ready_size: u64 },
    /// A complete local copy.
    Full { path: PathBuf, size: u64 },
}

impl LocalFileLocation {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            LocalFileLocation::Empty => None,
            LocalFileLocation::Partial { path, .. } | LocalFileLocation::Full { path, .. } => {
                Some(path)
            }
        }
    }
}

/// What `LoaderHooks::start_part` produced for a part.
#[derive(Debug)]
pub struct StartedPart {
    pub query: NetQuery,
    /// Whether the result goes through the reorder buffer when ordering is on.
    pub ordered: bool,
}

impl StartedPart {
    pub fn new(query: NetQuery) -> Self {
        Self {
            query,
            ordered: true,
        }
    }

    /// A query whose result is processed on arrival even with ordering on.
    pub fn unordered(query: NetQuery) -> Self {
        Self {
            query,
            ordered: false,
        }
    }
}

/// Lifecycle of one loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Not started yet.
    Init,
    /// Scheduling parts and absorbing their results.
    Dispatching,
    /// Everything transferred; verifying before completion.
    Checking,
    /// Completed successfully.
    Done,
    /// Failed with a fatal error.
    Failed,
    /// Stopped from outside.
    Stopped,
}

impl LoaderState {
    /// Whether no more work will be done.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoaderState::Done | LoaderState::Failed | LoaderState::Stopped
        )
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Init => "init",
            LoaderState::Dispatching => "dispatching",
            LoaderState::Checking => "checking",
            LoaderState::Done => "done",
            LoaderState::Failed => "failed",
            LoaderState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_size() {
        assert_eq!(FileInfo::new(10, 1).known_size(), Some(10));
        assert_eq!(FileInfo::unknown_size(100, 1).known_size(), None);
    }

    #[test]
    fn test_progress_percent() {
        let progress = LoaderProgress {
            part_count: 4,
            part_size: 100,
            ready_part_count: 1,
            is_ready: false,
            ready_size: 100,
        };
        assert_eq!(progress.percent(), 25.0);
        assert_eq!(progress.to_string(), "1/4 parts, 100 bytes");

        let empty = LoaderProgress {
            is_ready: true,
            ..LoaderProgress::default()
        };
        assert_eq!(empty.percent(), 100.0);
    }

    #[test]
    fn test_state_terminal() {
        assert!(!LoaderState::Checking.is_terminal());
        assert!(LoaderState::Stopped.is_terminal());
        assert_eq!(LoaderState::Dispatching.to_string(), "dispatching");
    }
}
