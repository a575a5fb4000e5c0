//! SHA-256 helpers for integrity checks.
//!
//! Remote hash lists are plain concatenations of 32-byte digests, one per
//! chunk. Local data is hashed in the same chunking to compare.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{LoaderError, LoaderResult};

/// Length of one SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a byte slice.
pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// Lowercase hex rendering of a digest.
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Digests of consecutive `chunk_size` chunks of `data` starting at `offset`.
///
/// Stops at the end of `data` or after `count` chunks, whichever is first.
pub fn chunk_digests(data: &[u8], offset: u64, chunk_size: u64, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * DIGEST_LEN);
    let mut start = offset as usize;
    for _ in 0..count {
        if start >= data.len() || chunk_size == 0 {
            break;
        }
        let end = (start + chunk_size as usize).min(data.len());
        out.extend_from_slice(&digest(&data[start..end]));
        start = end;
    }
    out
}

/// SHA-256 digest of `len` bytes of a file starting at `offset`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is shorter than the range.
pub fn file_range_digest(path: &Path, offset: u64, len: u64) -> LoaderResult<[u8; DIGEST_LEN]> {
    let io_err = |e| LoaderError::io(path, e);
    let mut file = File::open(path).map_err(io_err)?;
    file.seek(SeekFrom::Start(offset)).map_err(io_err)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE as u64) as usize;
        let bytes_read = file.read(&mut buffer[..want]).map_err(io_err)?;
        if bytes_read == 0 {
            return Err(LoaderError::io(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("file ends {} bytes before the checked range", remaining),
                ),
            ));
        }
        hasher.update(&buffer[..bytes_read]);
        remaining -= bytes_read as u64;
    }

    Ok(hasher.finalize().into())
}
