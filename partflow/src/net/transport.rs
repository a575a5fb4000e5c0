//! Transport seam between the engine and whatever moves bytes.

use tokio::sync::mpsc;
use tracing::trace;

use super::query::NetQuery;
use crate::loader::LoaderEvent;

/// Return address for a dispatched query.
///
/// The transport hands the finished query back through this; it lands in
/// the owning loader's event queue as [`LoaderEvent::QueryResult`].
#[derive(Debug)]
pub struct ReplyTo {
    tx: mpsc::UnboundedSender<LoaderEvent>,
}

impl ReplyTo {
    pub fn new(tx: mpsc::UnboundedSender<LoaderEvent>) -> Self {
        Self { tx }
    }

    /// Delivers the finished query. Returns `false` if the loader is gone.
    pub fn send(self, query: NetQuery) -> bool {
        let key = query.key();
        let delivered = self.tx.send(LoaderEvent::QueryResult(query)).is_ok();
        if !delivered {
            trace!(%key, "Loader gone, dropping query result");
        }
        delivered
    }
}

/// Issues network operations asynchronously.
///
/// `dispatch` must not block and must not call back into the loader
/// synchronously; the outcome is delivered later through `reply`. A
/// transport should watch `query.cancellation()` and answer a cancelled
/// query with `NetError::Canceled` (or drop it).
pub trait Transport: Send + Sync {
    fn dispatch(&self, query: NetQuery, reply: ReplyTo);
}
