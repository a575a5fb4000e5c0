//! In-process transport backed by a byte buffer.
//!
//! Serves range reads and hash lists from the buffer, stores uploaded parts
//! into it, and can inject latency, failures and corrupted reads. Used by
//! the CLI loopback transfers and by the tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::query::{NetQuery, NetRequest};
use super::transport::{ReplyTo, Transport};
use crate::checksum;
use crate::error::NetError;

#[derive(Debug)]
struct Fault {
    remaining: u32,
    error: NetError,
}

#[derive(Debug, Default)]
struct Inner {
    data: RwLock<Vec<u8>>,
    latency: Mutex<Duration>,
    faults: Mutex<HashMap<u64, Fault>>,
    corrupt: Mutex<HashSet<u64>>,
    dispatched: AtomicUsize,
    dispatched_offsets: Mutex<Vec<u64>>,
}

impl Inner {
    fn execute(&self, request: &NetRequest) -> Result<Bytes, NetError> {
        if let Some(error) = self.take_fault(request.offset()) {
            return Err(error);
        }

        match request {
            NetRequest::GetRange { offset, limit } => {
                let data = self.data.read();
                let start = (*offset as usize).min(data.len());
                let end = (start + *limit as usize).min(data.len());
                let mut chunk = data[start..end].to_vec();
                if !chunk.is_empty() && self.corrupt.lock().contains(offset) {
                    chunk[0] ^= 0xff;
                }
                Ok(Bytes::from(chunk))
            }
            NetRequest::PutPart { offset, data, .. } => {
                let mut stored = self.data.write();
                let start = *offset as usize;
                let end = start + data.len();
                if stored.len() < end {
                    stored.resize(end, 0);
                }
                stored[start..end].copy_from_slice(data);
                Ok(Bytes::new())
            }
            NetRequest::GetHashes {
                offset,
                chunk_size,
                count,
            } => {
                let data = self.data.read();
                Ok(Bytes::from(checksum::chunk_digests(
                    &data,
                    *offset,
                    *chunk_size,
                    *count,
                )))
            }
        }
    }

    fn take_fault(&self, offset: u64) -> Option<NetError> {
        let mut faults = self.faults.lock();
        let fault = faults.get_mut(&offset)?;
        let error = fault.error.clone();
        fault.remaining -= 1;
        if fault.remaining == 0 {
            faults.remove(&offset);
        }
        Some(error)
    }
}

/// Transport serving an in-memory byte buffer.
///
/// Cheap to clone; clones share the buffer and the fault table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Creates a transport serving `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let transport = Self::default();
        *transport.inner.data.write() = data.into();
        transport
    }

    /// Sets the artificial delay applied to every query.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = latency;
        self
    }

    /// Fails the next `times` queries starting at `offset` with `error`.
    pub fn fail_at(&self, offset: u64, times: u32, error: NetError) {
        if times == 0 {
            return;
        }
        self.inner.faults.lock().insert(
            offset,
            Fault {
                remaining: times,
                error,
            },
        );
    }

    /// Flips the first byte of every range read starting at `offset`.
    pub fn corrupt_reads_at(&self, offset: u64) {
        self.inner.corrupt.lock().insert(offset);
    }

    /// Number of queries dispatched so far.
    pub fn dispatched(&self) -> usize {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    /// Start offsets of all dispatched queries, in dispatch order.
    pub fn dispatched_offsets(&self) -> Vec<u64> {
        self.inner.dispatched_offsets.lock().clone()
    }

    /// Snapshot of the served (or uploaded) bytes.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.read().clone()
    }

    /// Runs a request synchronously, bypassing latency and cancellation.
    pub fn execute(&self, request: &NetRequest) -> Result<Bytes, NetError> {
        self.inner.execute(request)
    }
}

impl Transport for MemoryTransport {
    fn dispatch(&self, mut query: NetQuery, reply: ReplyTo) {
        self.inner.dispatched.fetch_add(1, Ordering::SeqCst);
        self.inner
            .dispatched_offsets
            .lock()
            .push(query.request().offset());

        let inner = Arc::clone(&self.inner);
        let latency = *self.inner.latency.lock();
        let cancel = query.cancellation().clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(NetError::Canceled),
                _ = tokio::time::sleep(latency) => inner.execute(query.request()),
            };
            trace!(key = %query.key(), ok = outcome.is_ok(), "Memory query done");
            query.set_result(outcome);
            reply.send(query);
        });
    }
}
