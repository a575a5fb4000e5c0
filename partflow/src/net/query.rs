//! Network operations as seen by the engine.

use std::fmt;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::NetError;

/// Identifies which in-flight entry a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKey {
    /// A per-part operation, keyed by a locally generated request id.
    Part(u64),
    /// Non-part traffic such as integrity-check queries.
    Common(u64),
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Part(id) => write!(f, "part-request#{}", id),
            RequestKey::Common(id) => write!(f, "common-request#{}", id),
        }
    }
}

/// What a query asks the remote side to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetRequest {
    /// Read `limit` bytes starting at `offset`.
    GetRange { offset: u64, limit: u64 },
    /// Store one part of an upload.
    PutPart {
        part_id: usize,
        offset: u64,
        data: Bytes,
    },
    /// Fetch SHA-256 digests of `count` consecutive chunks starting at `offset`.
    GetHashes {
        offset: u64,
        chunk_size: u64,
        count: usize,
    },
}

impl NetRequest {
    /// Byte offset the request starts at.
    pub fn offset(&self) -> u64 {
        match self {
            NetRequest::GetRange { offset, .. }
            | NetRequest::PutPart { offset, .. }
            | NetRequest::GetHashes { offset, .. } => *offset,
        }
    }
}

/// A network operation plus, once delivered, its outcome.
#[derive(Debug)]
pub struct NetQuery {
    key: RequestKey,
    request: NetRequest,
    result: Option<Result<Bytes, NetError>>,
    cancel: CancellationToken,
}

impl NetQuery {
    /// Creates a query that has not been dispatched yet.
    pub fn new(request: NetRequest) -> Self {
        Self {
            key: RequestKey::Common(0),
            request,
            result: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    pub(crate) fn set_key(&mut self, key: RequestKey) {
        self.key = key;
    }

    pub fn request(&self) -> &NetRequest {
        &self.request
    }

    /// Stores the outcome; called by the transport.
    pub fn set_result(&mut self, result: Result<Bytes, NetError>) {
        self.result = Some(result);
    }

    pub fn set_ok(&mut self, payload: Bytes) {
        self.set_result(Ok(payload));
    }

    pub fn set_error(&mut self, error: NetError) {
        self.set_result(Err(error));
    }

    /// Whether an outcome has been stored.
    pub fn is_ready(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }

    pub fn error(&self) -> Option<&NetError> {
        match &self.result {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match &self.result {
            Some(Ok(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Moves the outcome out, leaving the query not ready.
    pub fn take_result(&mut self) -> Option<Result<Bytes, NetError>> {
        self.result.take()
    }

    /// Token the transport watches to abort the operation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
