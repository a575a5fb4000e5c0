//! Owner-facing callbacks of the transfer kinds.

use tokio::sync::mpsc;

use crate::error::LoaderError;
use crate::loader::LoaderProgress;

/// What the owner of a transfer hears about it.
///
/// Exactly one of `on_ok` and `on_error` is called, unless the transfer is
/// stopped from outside first.
pub trait TransferCallback: Send {
    fn on_progress(&mut self, progress: LoaderProgress);
    fn on_ok(&mut self, size: u64);
    fn on_error(&mut self, error: &LoaderError);
}

/// A transfer notification as sent by [`ChannelCallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(LoaderProgress),
    Completed(u64),
    Failed(String),
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress(_))
    }
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelCallback {
    /// Creates the callback and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TransferEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }
}

impl TransferCallback for ChannelCallback {
    fn on_progress(&mut self, progress: LoaderProgress) {
        self.send(TransferEvent::Progress(progress));
    }

    fn on_ok(&mut self, size: u64) {
        self.send(TransferEvent::Completed(size));
    }

    fn on_error(&mut self, error: &LoaderError) {
        self.send(TransferEvent::Failed(error.to_string()));
    }
}
