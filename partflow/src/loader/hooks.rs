//! Per-kind behavior plugged into the engine.

use std::time::Duration;

use super::types::{CheckInfo, FileInfo, LoaderProgress, LocalFileLocation, PrefixInfo, StartedPart};
use crate::error::{LoaderError, LoaderResult};
use crate::net::NetQuery;
use crate::parts::Part;

/// What a transfer kind (download, upload, ...) supplies to a [`FileLoader`].
///
/// The required methods describe the file, build one query per part and
/// consume results. The provided methods cover optional behavior: resume
/// from a local copy, retry decisions and the integrity-check phase.
///
/// Hooks run on the loader's task and must not block.
///
/// [`FileLoader`]: super::FileLoader
pub trait LoaderHooks: Send {
    /// Describes the file. Failure is fatal; nothing is dispatched.
    fn init(&mut self) -> LoaderResult<FileInfo>;

    /// Final validation once everything is ready. Failure is fatal.
    fn on_ok(&mut self, size: u64) -> LoaderResult<()>;

    /// Terminal failure. Called at most once, and never after `on_ok`.
    fn on_error(&mut self, error: &LoaderError);

    /// Called at the start of every dispatch pass.
    fn before_start_parts(&mut self) -> LoaderResult<()> {
        Ok(())
    }

    /// Builds the network operation for one part.
    ///
    /// A network error releases the part and retries it after a backoff;
    /// any other error is fatal.
    fn start_part(&mut self, part: Part, part_count: usize) -> LoaderResult<StartedPart>;

    /// Called at the end of every dispatch pass.
    fn after_start_parts(&mut self) {}

    /// Consumes the result of a part's operation.
    ///
    /// Returns the number of bytes the part now has ready. The query may
    /// carry an error when `should_restart_part` declined a retry.
    fn process_part(&mut self, part: Part, query: NetQuery) -> LoaderResult<u64>;

    /// Progress after every confirmed part.
    fn on_progress(&mut self, progress: LoaderProgress);

    /// Reports the ready prefix of a local copy.
    ///
    /// `Unsupported` means resuming is not applicable to this kind.
    fn on_update_local_location(
        &mut self,
        _location: &LocalFileLocation,
    ) -> LoaderResult<PrefixInfo> {
        Err(LoaderError::Unsupported)
    }

    /// Whether a failed part should be scheduled again.
    ///
    /// `false` passes the failed query on to `process_part`.
    fn should_restart_part(&mut self, _part: Part, _query: &NetQuery) -> LoaderResult<bool> {
        Ok(false)
    }

    /// Pause before a part released by `should_restart_part` goes out
    /// again. New dispatches wait for it.
    fn restart_pause(&mut self, _part: Part) -> Duration {
        Duration::ZERO
    }

    /// Consumes the result of an integrity-check query.
    fn process_check_query(&mut self, _query: NetQuery) -> LoaderResult<()> {
        Err(LoaderError::Unsupported)
    }

    /// Schedules integrity checking. The default needs none.
    fn check_loop(
        &mut self,
        _checked_prefix_size: u64,
        _ready_prefix_size: u64,
        _is_ready: bool,
    ) -> LoaderResult<CheckInfo> {
        Ok(CheckInfo::default())
    }

    /// Whether a local file handle is worth keeping open.
    fn keep_fd_flag(&mut self, _keep: bool) {}
}

impl<T: LoaderHooks + ?Sized> LoaderHooks for Box<T> {
    fn init(&mut self) -> LoaderResult<FileInfo> {
        (**self).init()
    }

    fn on_ok(&mut self, size: u64) -> LoaderResult<()> {
        (**self).on_ok(size)
    }

    fn on_error(&mut self, error: &LoaderError) {
        (**self).on_error(error)
    }

    fn before_start_parts(&mut self) -> LoaderResult<()> {
        (**self).before_start_parts()
    }

    fn start_part(&mut self, part: Part, part_count: usize) -> LoaderResult<StartedPart> {
        (**self).start_part(part, part_count)
    }

    fn after_start_parts(&mut self) {
        (**self).after_start_parts()
    }

    fn process_part(&mut self, part: Part, query: NetQuery) -> LoaderResult<u64> {
        (**self).process_part(part, query)
    }

    fn on_progress(&mut self, progress: LoaderProgress) {
        (**self).on_progress(progress)
    }

    fn on_update_local_location(
        &mut self,
        location: &LocalFileLocation,
    ) -> LoaderResult<PrefixInfo> {
        (**self).on_update_local_location(location)
    }

    fn should_restart_part(&mut self, part: Part, query: &NetQuery) -> LoaderResult<bool> {
        (**self).should_restart_part(part, query)
    }

    fn restart_pause(&mut self, part: Part) -> Duration {
        (**self).restart_pause(part)
    }

    fn process_check_query(&mut self, query: NetQuery) -> LoaderResult<()> {
        (**self).process_check_query(query)
    }

    fn check_loop(
        &mut self,
        checked_prefix_size: u64,
        ready_prefix_size: u64,
        is_ready: bool,
    ) -> LoaderResult<CheckInfo> {
        (**self).check_loop(checked_prefix_size, ready_prefix_size, is_ready)
    }

    fn keep_fd_flag(&mut self, keep: bool) {
        (**self).keep_fd_flag(keep)
    }
}
