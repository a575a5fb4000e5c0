//! Uploads a local file part by part.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
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

/// [`LoaderHooks`] sending `PutPart` requests read from a local file.
///
/// The source size is taken at `init` and stays final. An interrupted upload
/// resumes either from `with_uploaded_parts` or from a `Partial` location
/// naming the source and the prefix the remote already holds.
pub struct FileUploader<C: TransferCallback> {
    path: PathBuf,
    part_size: u64,
    size: u64,
    uploaded_parts: Vec<usize>,
    file: Option<File>,
    retries: PartRetryTracker,
    check: Option<IntegrityCheck>,
    callback: C,
}

impl<C: TransferCallback> FileUploader<C> {
    pub fn new(path: impl Into<PathBuf>, callback: C) -> Self {
        Self {
            path: path.into(),
            part_size: 0,
            size: 0,
            uploaded_parts: Vec::new(),
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

    /// Parts the remote already holds.
    pub fn with_uploaded_parts(mut self, parts: Vec<usize>) -> Self {
        self.uploaded_parts = parts;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retries = PartRetryTracker::new(policy);
        self
    }

    /// Verifies the uploaded copy against remote SHA-256 digests.
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

    fn file(&mut self) -> LoaderResult<&mut File> {
        if self.file.is_none() {
            let file = File::open(&self.path).map_err(|e| LoaderError::io(&self.path, e))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| LoaderError::Fatal("source handle missing".into()))
    }

    fn read_part(&mut self, part: Part) -> LoaderResult<Bytes> {
        let path = self.path.clone();
        let mut buf = vec![0u8; part.size as usize];
        let file = self.file()?;
        file.seek(SeekFrom::Start(part.offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| LoaderError::io(path, e))?;
        Ok(Bytes::from(buf))
    }
}

impl<C: TransferCallback> LoaderHooks for FileUploader<C> {
    fn init(&mut self) -> LoaderResult<FileInfo> {
        let meta = std::fs::metadata(&self.path).map_err(|e| LoaderError::io(&self.path, e))?;
        if !meta.is_file() {
            return Err(LoaderError::Init(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }
        self.size = meta.len();
        let size = i64::try_from(self.size)
            .map_err(|_| LoaderError::InvalidFileInfo(format!("size {} too large", self.size)))?;
        self.file()?;

        info!(
            path = %self.path.display(),
            size = self.size,
            verify = self.check.is_some(),
            "Starting upload"
        );
        Ok(FileInfo::new(size, self.part_size).with_ready_parts(self.uploaded_parts.clone()))
    }

    fn on_ok(&mut self, size: u64) -> LoaderResult<()> {
        if size != self.size {
            return Err(LoaderError::InvalidFileInfo(format!(
                "uploaded {} bytes of {}",
                size, self.size
            )));
        }
        info!(path = %self.path.display(), size, "Upload complete");
        self.callback.on_ok(size);
        Ok(())
    }

    fn on_error(&mut self, error: &LoaderError) {
        warn!(path = %self.path.display(), %error, "Upload failed");
        self.callback.on_error(error);
    }

    fn start_part(&mut self, part: Part, _part_count: usize) -> LoaderResult<StartedPart> {
        let data = self.read_part(part)?;
        Ok(StartedPart::new(NetQuery::new(NetRequest::PutPart {
            part_id: part.id,
            offset: part.offset,
            data,
        })))
    }

    fn process_part(&mut self, part: Part, mut query: NetQuery) -> LoaderResult<u64> {
        match query.take_result() {
            Some(Ok(_)) => {
                self.retries.reset(part.id);
                Ok(part.size)
            }
            Some(Err(error)) if error.is_transient() => Err(LoaderError::RetriesExhausted {
                part_id: part.id,
                attempts: self.retries.attempts(part.id),
            }),
            Some(Err(error)) => Err(error.into()),
            None => Err(LoaderError::Fatal(format!("part {} without result", part.id))),
        }
    }

    fn on_progress(&mut self, progress: LoaderProgress) {
        self.callback.on_progress(progress);
    }

    fn on_update_local_location(
        &mut self,
        location: &LocalFileLocation,
    ) -> LoaderResult<PrefixInfo> {
        let uploaded = match location {
            LocalFileLocation::Empty => return Ok(PrefixInfo::default()),
            LocalFileLocation::Partial { path, ready_size } if path == &self.path => *ready_size,
            LocalFileLocation::Full { path, size } if path == &self.path => *size,
            other => {
                warn!(location = ?other, "Location does not name the upload source, ignoring");
                return Ok(PrefixInfo::default());
            }
        };
        let size = uploaded.min(self.size);
        debug!(uploaded, size, "Resuming upload");
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
        if !keep {
            self.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use crate::transfer::ChannelCallback;
    use tempfile::TempDir;

    fn source(dir: &TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("source.bin");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn uploader(path: PathBuf) -> FileUploader<ChannelCallback> {
        let (callback, _rx) = ChannelCallback::new();
        FileUploader::new(path, callback).with_part_size(100)
    }

    #[test]
    fn test_init_reads_size() {
        let dir = TempDir::new().unwrap();
        let mut hooks = uploader(source(&dir, 250)).with_uploaded_parts(vec![0]);
        let info = hooks.init().unwrap();
        assert_eq!(info.size, 250);
        assert!(info.is_size_final);
        assert_eq!(info.ready_parts, vec![0]);
    }

    #[test]
    fn test_missing_source_fails_init() {
        let dir = TempDir::new().unwrap();
        let mut hooks = uploader(dir.path().join("missing.bin"));
        assert!(matches!(hooks.init(), Err(LoaderError::Io { .. })));
    }

    #[test]
    fn test_start_part_reads_range() {
        let dir = TempDir::new().unwrap();
        let mut hooks = uploader(source(&dir, 250));
        hooks.init().unwrap();

        let started = hooks.start_part(Part::new(2, 200, 50), 3).unwrap();
        match started.query.request() {
            NetRequest::PutPart {
                part_id,
                offset,
                data,
            } => {
                assert_eq!(*part_id, 2);
                assert_eq!(*offset, 200);
                assert_eq!(data.len(), 50);
                assert_eq!(data[0], (200 % 251) as u8);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_acknowledged_part_counts_full_size() {
        let dir = TempDir::new().unwrap();
        let mut hooks = uploader(source(&dir, 250));
        hooks.init().unwrap();
        let part = Part::new(0, 0, 100);
        let mut query = hooks.start_part(part, 3).unwrap().query;
        query.set_ok(Bytes::new());
        assert_eq!(hooks.process_part(part, query).unwrap(), 100);
    }

    #[test]
    fn test_failed_part_escalates() {
        let dir = TempDir::new().unwrap();
        let mut hooks =
            uploader(source(&dir, 100)).with_retry_policy(RetryPolicy::constant(1, Duration::ZERO));
        hooks.init().unwrap();
        let part = Part::new(0, 0, 100);
        let mut query = hooks.start_part(part, 1).unwrap().query;
        query.set_error(NetError::Timeout(Duration::from_secs(1)));

        assert!(!hooks.should_restart_part(part, &query).unwrap());
        assert!(matches!(
            hooks.process_part(part, query),
            Err(LoaderError::RetriesExhausted { part_id: 0, .. })
        ));
    }

    #[test]
    fn test_resume_prefix_clamped_to_source() {
        let dir = TempDir::new().unwrap();
        let path = source(&dir, 250);
        let mut hooks = uploader(path.clone());
        hooks.init().unwrap();

        let prefix = hooks
            .on_update_local_location(&LocalFileLocation::Partial {
                path: path.clone(),
                ready_size: 1000,
            })
            .unwrap();
        assert_eq!(prefix, PrefixInfo::ready(250));

        let prefix = hooks
            .on_update_local_location(&LocalFileLocation::Partial {
                path: dir.path().join("elsewhere.bin"),
                ready_size: 100,
            })
            .unwrap();
        assert!(!prefix.is_ready);
    }

    #[test]
    fn test_on_ok_rejects_short_upload() {
        let dir = TempDir::new().unwrap();
        let mut hooks = uploader(source(&dir, 250));
        hooks.init().unwrap();
        assert!(hooks.on_ok(200).is_err());
        assert!(hooks.on_ok(250).is_ok());
    }
}
