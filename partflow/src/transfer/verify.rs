//! Integrity-check phase shared by the transfer kinds.
//!
//! Once every part is ready, the remote side is asked for SHA-256 digests of
//! consecutive chunks and each is compared with the same range of the local
//! file. The checked prefix only moves forward.
//!
//! ```text
//! local   |====chunk====|====chunk====|==tail==|
//! remote  | digest      | digest      | digest |   (GetHashes, up to 16 per query)
//!         ^ checked ───────────────────────────► size
//! ```

use std::path::Path;

use tracing::{debug, warn};

use crate::checksum::{self, DIGEST_LEN};
use crate::error::{LoaderError, LoaderResult};
use crate::loader::CheckInfo;
use crate::net::{NetQuery, NetRequest};

/// Bytes covered by one remote digest (128 KiB).
pub const DEFAULT_HASH_CHUNK_SIZE: u64 = 128 * 1024;

/// Digests requested per check query.
pub const HASHES_PER_QUERY: usize = 16;

/// Check-phase state of one transfer.
#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    chunk_size: u64,
    checked: u64,
    limit: u64,
    in_flight: bool,
    failures: u32,
    max_failures: u32,
}

impl IntegrityCheck {
    /// Creates a check allowing `max_failures` transient query failures.
    pub fn new(chunk_size: u64, max_failures: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            checked: 0,
            limit: 0,
            in_flight: false,
            failures: 0,
            max_failures,
        }
    }

    /// Verified prefix size.
    pub fn checked(&self) -> u64 {
        self.checked
    }

    /// One `check_loop` step.
    ///
    /// Checking is always required, so the transfer cannot complete before
    /// the whole file is verified.
    pub fn step(&mut self, reported_checked: u64, ready_prefix_size: u64, is_ready: bool) -> CheckInfo {
        let mut info = CheckInfo {
            need_check: true,
            checked_prefix_size: self.checked,
            changed: self.checked > reported_checked,
            ..CheckInfo::default()
        };
        if !is_ready {
            return info;
        }

        self.limit = ready_prefix_size;
        if self.checked < self.limit && !self.in_flight {
            let remaining_chunks = (self.limit - self.checked).div_ceil(self.chunk_size);
            let count = (remaining_chunks as usize).min(HASHES_PER_QUERY);
            debug!(offset = self.checked, count, "Requesting remote hashes");
            self.in_flight = true;
            info.queries.push(NetQuery::new(NetRequest::GetHashes {
                offset: self.checked,
                chunk_size: self.chunk_size,
                count,
            }));
        }
        info
    }

    /// Compares a hash list with the local file at `path`.
    pub fn absorb(&mut self, mut query: NetQuery, path: &Path) -> LoaderResult<()> {
        self.in_flight = false;
        let (offset, chunk_size) = match query.request() {
            NetRequest::GetHashes {
                offset, chunk_size, ..
            } => (*offset, *chunk_size),
            other => {
                return Err(LoaderError::Fatal(format!(
                    "unexpected check query {:?}",
                    other
                )))
            }
        };

        let payload = match query.take_result() {
            Some(Ok(payload)) => payload,
            Some(Err(error)) if error.is_transient() && self.failures < self.max_failures => {
                self.failures += 1;
                warn!(offset, failures = self.failures, %error, "Hash query failed, will retry");
                return Ok(());
            }
            Some(Err(error)) => return Err(error.into()),
            None => return Err(LoaderError::Fatal("hash query without result".into())),
        };
        if payload.is_empty() || payload.len() % DIGEST_LEN != 0 {
            return Err(LoaderError::Fatal(format!(
                "malformed hash list of {} bytes at offset {}",
                payload.len(),
                offset
            )));
        }

        let mut chunk_offset = offset;
        for expected in payload.chunks(DIGEST_LEN) {
            if chunk_offset >= self.limit {
                break;
            }
            let len = chunk_size.min(self.limit - chunk_offset);
            let actual = checksum::file_range_digest(path, chunk_offset, len)?;
            if actual[..] != expected[..] {
                return Err(LoaderError::ChecksumMismatch {
                    offset: chunk_offset,
                    expected: checksum::to_hex(expected),
                    actual: checksum::to_hex(&actual),
                });
            }
            chunk_offset += len;
        }

        debug!(from = self.checked, to = chunk_offset, "Chunks verified");
        self.checked = self.checked.max(chunk_offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn answered(query: &NetQuery, data: &[u8]) -> NetQuery {
        let mut answer = NetQuery::new(query.request().clone());
        if let NetRequest::GetHashes {
            offset,
            chunk_size,
            count,
        } = query.request()
        {
            answer.set_ok(Bytes::from(checksum::chunk_digests(
                data,
                *offset,
                *chunk_size,
                *count,
            )));
        }
        answer
    }

    #[test]
    fn test_not_ready_requests_nothing() {
        let mut check = IntegrityCheck::new(100, 1);
        let info = check.step(0, 300, false);
        assert!(info.need_check);
        assert!(info.queries.is_empty());
    }

    #[test]
    fn test_verifies_whole_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut check = IntegrityCheck::new(100, 1);
        let info = check.step(0, 250, true);
        assert_eq!(info.queries.len(), 1);
        assert_eq!(
            info.queries[0].request(),
            &NetRequest::GetHashes {
                offset: 0,
                chunk_size: 100,
                count: 3
            }
        );

        // Only one query in flight at a time.
        assert!(check.step(0, 250, true).queries.is_empty());

        check.absorb(answered(&info.queries[0], &data), &path).unwrap();
        assert_eq!(check.checked(), 250);

        let info = check.step(0, 250, true);
        assert!(info.changed);
        assert_eq!(info.checked_prefix_size, 250);
        assert!(info.queries.is_empty());
    }

    #[test]
    fn test_mismatch_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, vec![1u8; 200]).unwrap();

        let mut check = IntegrityCheck::new(100, 1);
        let info = check.step(0, 200, true);
        let mut remote = vec![1u8; 200];
        remote[150] = 9;

        let result = check.absorb(answered(&info.queries[0], &remote), &path);
        assert!(matches!(
            result,
            Err(LoaderError::ChecksumMismatch { offset: 100, .. })
        ));
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let mut check = IntegrityCheck::new(100, 1);
        let mut query = check.step(0, 100, true).queries.remove(0);
        query.set_error(NetError::Timeout(std::time::Duration::from_secs(1)));
        check.absorb(query, &path).unwrap();

        let mut query = check.step(0, 100, true).queries.remove(0);
        query.set_error(NetError::Timeout(std::time::Duration::from_secs(1)));
        assert!(check.absorb(query, &path).is_err());
    }

    #[test]
    fn test_empty_hash_list_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let mut check = IntegrityCheck::new(100, 0);
        let mut query = check.step(0, 100, true).queries.remove(0);
        query.set_ok(Bytes::new());
        assert!(matches!(check.absorb(query, &path), Err(LoaderError::Fatal(_))));
    }
}
