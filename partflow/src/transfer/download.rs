//! Downloads a remote file into a local one.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::callback::TransferCallback;
use super::verify::{IntegrityCheck, DEFAULT_HASH_CHUNK_SIZE};
use crate::error::{LoaderError, LoaderResult};
use crate::loader::{
    CheckInfo, FileInfo, LoaderHooks, LoaderProgress, LocalFileLocation, PartRetryTracker,
    PrefixInfo, StartedPart,
};
use crate::net::{NetQuery, NetRequest};
use crate::parts::Part;
use crate::policy::RetryPolicy;

/// [`LoaderHooks`] writing `GetRange` results into a local file.
///
/// Parts land at their own offset, so results may be written in any order.
/// The destination is never truncated before completion, which lets a
/// partial copy from an earlier session be resumed through
/// `update_local_file_location`.
pub struct FileDownloader<C: TransferCallback> {
    path: PathBuf,
    size: Option<u64>,
    expected_size: u64,
    part_size: u64,
    ready_parts: Vec<usize>,
    file: Option<File>,
    retries: PartRetryTracker,
    check: Option<IntegrityCheck>,
    callback: C,
}

impl<C: TransferCallback> FileDownloader<C> {
    /// Downloads into `path`. `size` is `None` when the remote size is not
    /// known up front.
    pub fn new(path: impl Into<PathBuf>, size: Option<u64>, callback: C) -> Self {
        Self {
            path: path.into(),
            size,
            expected_size: size.unwrap_or(0),
            part_size: 0,
            ready_parts: Vec::new(),
            file: None,
            retries: PartRetryTracker::default(),
            check: None,
            callback,
        }
    }

    /// Fixed part size; zero lets the engine pick one.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Size hint while the real size is unknown.
    pub fn with_expected_size(mut self, expected_size: u64) -> Self {
        self.expected_size = expected_size;
        self
    }

    /// Parts already present in the destination.
    pub fn with_ready_parts(mut self, ready_parts: Vec<usize>) -> Self {
        self.ready_parts = ready_parts;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retries = PartRetryTracker::new(policy);
        self
    }

    /// Verifies the finished file against remote SHA-256 digests.
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.check = enabled.then(|| {
            IntegrityCheck::new(DEFAULT_HASH_CHUNK_SIZE, self.retries.policy().max_attempts())
        });
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }

    pub fn into_callback(self) -> C {
        self.callback
    }

    /// Whether the destination handle is currently open.
    pub fn is_file_open(&self) -> bool {
        self.file.is_some()
    }

    fn file(&mut self) -> LoaderResult<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| LoaderError::io(&self.path, e))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| LoaderError::Fatal("destination handle missing".into()))
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> LoaderResult<()> {
        let path = self.path.clone();
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data))
            .map_err(|e| LoaderError::io(path, e))
    }

    fn local_len(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path).ok().map(|meta| meta.len())
    }
}

impl<C: TransferCallback> LoaderHooks for FileDownloader<C> {
    fn init(&mut self) -> LoaderResult<FileInfo> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LoaderError::io(parent, e))?;
        }
        self.file()?;

        let info = match self.size {
            Some(size) => {
                let size = i64::try_from(size)
                    .map_err(|_| LoaderError::InvalidFileInfo(format!("size {} too large", size)))?;
                FileInfo::new(size, self.part_size)
            }
            None => FileInfo::unknown_size(
                i64::try_from(self.expected_size).unwrap_or(i64::MAX),
                self.part_size,
            ),
        };
        info!(
            path = %self.path.display(),
            size = ?self.size,
            verify = self.check.is_some(),
            "Starting download"
        );
        Ok(info.with_ready_parts(self.ready_parts.clone()))
    }

    fn on_ok(&mut self, size: u64) -> LoaderResult<()> {
        let path = self.path.clone();
        let file = self.file()?;
        file.set_len(size)
            .and_then(|_| file.sync_all())
            .map_err(|e| LoaderError::io(path, e))?;
        info!(path = %self.path.display(), size, "Download complete");
        self.callback.on_ok(size);
        Ok(())
    }

    fn on_error(&mut self, error: &LoaderError) {
        warn!(path = %self.path.display(), %error, "Download failed");
        self.callback.on_error(error);
    }

    fn start_part(&mut self, part: Part, _part_count: usize) -> LoaderResult<StartedPart> {
        Ok(StartedPart::new(NetQuery::new(NetRequest::GetRange {
            offset: part.offset,
            limit: part.size,
        })))
    }

    fn process_part(&mut self, part: Part, mut query: NetQuery) -> LoaderResult<u64> {
        let payload = match query.take_result() {
            Some(Ok(payload)) => payload,
            Some(Err(error)) if error.is_transient() => {
                return Err(LoaderError::RetriesExhausted {
                    part_id: part.id,
                    attempts: self.retries.attempts(part.id),
                })
            }
            Some(Err(error)) => return Err(error.into()),
            None => return Err(LoaderError::Fatal(format!("part {} without result", part.id))),
        };

        let len = payload.len() as u64;
        if len > part.size {
            return Err(LoaderError::InvalidPartSize {
                part_id: part.id,
                expected: part.size,
                actual: len,
            });
        }
        self.write_at(part.offset, &payload)?;
        self.retries.reset(part.id);
        Ok(len)
    }

    fn on_progress(&mut self, progress: LoaderProgress) {
        self.callback.on_progress(progress);
    }

    fn on_update_local_location(
        &mut self,
        location: &LocalFileLocation,
    ) -> LoaderResult<PrefixInfo> {
        let (path, claimed) = match location {
            LocalFileLocation::Empty => return Ok(PrefixInfo::default()),
            LocalFileLocation::Partial { path, ready_size } => (path, *ready_size),
            LocalFileLocation::Full { path, size } => {
                if self.size.is_some_and(|known| known != *size) {
                    warn!(claimed = size, known = ?self.size, "Local copy has the wrong size");
                    return Ok(PrefixInfo::default());
                }
                (path, *size)
            }
        };
        if path != &self.path {
            warn!(
                local = %path.display(),
                destination = %self.path.display(),
                "Local copy is not the destination, ignoring"
            );
            return Ok(PrefixInfo::default());
        }

        let present = self.local_len(path).unwrap_or(0);
        let size = claimed.min(present);
        debug!(claimed, present, size, "Resuming from local copy");
        Ok(PrefixInfo::ready(size))
    }

    fn should_restart_part(&mut self, part: Part, query: &NetQuery) -> LoaderResult<bool> {
        Ok(query
            .error()
            .is_some_and(|error| self.retries.should_retry(part.id, error)))
    }

    fn restart_pause(&mut self, part: Part) -> Duration {
        self.retries.pause(part.id)
    }

    fn process_check_query(&mut self, query: NetQuery) -> LoaderResult<()> {
        let path = self.path.clone();
        match self.check.as_mut() {
            Some(check) => check.absorb(query, &path),
            None => Err(LoaderError::Unsupported),
        }
    }

    fn check_loop(
        &mut self,
        checked_prefix_size: u64,
        ready_prefix_size: u64,
        is_ready: bool,
    ) -> LoaderResult<CheckInfo> {
        Ok(match self.check.as_mut() {
            Some(check) => check.step(checked_prefix_size, ready_prefix_size, is_ready),
            None => CheckInfo::default(),
        })
    }

    fn keep_fd_flag(&mut self, keep: bool) {
        if !keep && self.file.take().is_some() {
            debug!(path = %self.path.display(), "Closed destination handle");
        }
    }
}
