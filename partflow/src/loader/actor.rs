//! Task wrapper that feeds events into a [`FileLoader`].
//!
//! The actor owns the loader and its event queue. Transports reply into the
//! same queue, so every state change happens on the actor's task, one event
//! at a time.
//!
//! ```text
//! LoaderHandle ──┐
//! Transport ─────┼──► mpsc<LoaderEvent> ──► LoaderActor ──► FileLoader
//! Grant sink ────┘                              │
//!                                               └─► LoaderOutcome
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (actor, handle) = LoaderActor::new(hooks, transport, LoaderConfig::default());
//! handle.set_resource_manager(&manager, Priority::NORMAL)?;
//! let outcome = actor.spawn().await?;
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::engine::FileLoader;
use super::event::LoaderEvent;
use super::hooks::LoaderHooks;
use super::types::{LoaderState, LocalFileLocation};
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};
use crate::net::Transport;
use crate::policy::Priority;
use crate::resource::{GrantSink, ResourceManager, ResourceState};

/// How a loader ended.
#[derive(Debug)]
pub enum LoaderOutcome {
    /// `on_ok` accepted the transfer; carries the final size.
    Completed(u64),
    /// The transfer failed; `on_error` saw the same error.
    Failed(LoaderError),
    /// Stopped from outside before reaching a terminal callback.
    Stopped,
}

impl LoaderOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, LoaderOutcome::Completed(_))
    }

    /// Final size, when completed.
    pub fn size(&self) -> Option<u64> {
        match self {
            LoaderOutcome::Completed(size) => Some(*size),
            _ => None,
        }
    }
}

/// Owner-side control surface of a running loader.
#[derive(Debug, Clone)]
pub struct LoaderHandle {
    tx: mpsc::UnboundedSender<LoaderEvent>,
    shutdown: CancellationToken,
}

impl LoaderHandle {
    fn send(&self, event: LoaderEvent) -> LoaderResult<()> {
        self.tx.send(event).map_err(|_| LoaderError::ChannelClosed)
    }

    pub fn update_priority(&self, priority: Priority) -> LoaderResult<()> {
        self.send(LoaderEvent::UpdatePriority(priority))
    }

    /// Pushes a grant directly, bypassing any resource manager.
    pub fn update_resources(&self, state: ResourceState) -> LoaderResult<()> {
        self.send(LoaderEvent::UpdateResources(state))
    }

    pub fn update_local_file_location(&self, location: LocalFileLocation) -> LoaderResult<()> {
        self.send(LoaderEvent::UpdateLocalLocation(location))
    }

    /// Registers the loader with `manager` and attaches the registration.
    pub fn set_resource_manager(
        &self,
        manager: &ResourceManager,
        priority: Priority,
    ) -> LoaderResult<()> {
        let tx = self.tx.clone();
        let sink: Arc<dyn GrantSink> = Arc::new(move |state: ResourceState| {
            let _ = tx.send(LoaderEvent::UpdateResources(state));
        });
        let link = manager.register(priority, sink);
        self.send(LoaderEvent::SetResourceManager(link))
    }

    /// Stops the loader. No terminal callback is made.
    pub fn hangup(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled when the loader is asked to stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Runs one [`FileLoader`] on a tokio task.
pub struct LoaderActor<H: LoaderHooks> {
    loader: FileLoader<H>,
    tx: mpsc::UnboundedSender<LoaderEvent>,
    rx: mpsc::UnboundedReceiver<LoaderEvent>,
    shutdown: CancellationToken,
}

impl<H: LoaderHooks + 'static> LoaderActor<H> {
    /// Creates an actor and the handle controlling it.
    ///
    /// Events sent through the handle before the actor runs are applied
    /// ahead of the first dispatch.
    pub fn new(
        hooks: H,
        transport: Arc<dyn Transport>,
        config: LoaderConfig,
    ) -> (Self, LoaderHandle) {
        Self::with_shutdown(hooks, transport, config, CancellationToken::new())
    }

    /// Like [`LoaderActor::new`], stopping when `shutdown` is cancelled.
    pub fn with_shutdown(
        hooks: H,
        transport: Arc<dyn Transport>,
        config: LoaderConfig,
        shutdown: CancellationToken,
    ) -> (Self, LoaderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let loader = FileLoader::new(hooks, transport, tx.clone(), config);
        let handle = LoaderHandle {
            tx: tx.clone(),
            shutdown: shutdown.clone(),
        };
        (
            Self {
                loader,
                tx,
                rx,
                shutdown,
            },
            handle,
        )
    }

    /// Spawns [`LoaderActor::run`] on the current runtime.
    pub fn spawn(self) -> JoinHandle<LoaderOutcome> {
        tokio::spawn(self.run())
    }

    /// Runs until the loader completes, fails or is stopped.
    pub async fn run(self) -> LoaderOutcome {
        self.run_to_end().await.0
    }

    /// Like [`LoaderActor::run`], also returning the hooks.
    pub async fn run_to_end(mut self) -> (LoaderOutcome, H) {
        while let Ok(event) = self.rx.try_recv() {
            self.loader.handle(event);
        }
        self.loader.start();

        loop {
            self.schedule_wakeup();
            if self.loader.state().is_terminal() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Loader shutdown requested");
                    self.loader.hangup();
                    break;
                }

                event = self.rx.recv() => match event {
                    Some(event) => self.loader.handle(event),
                    None => {
                        warn!("Loader event channel closed");
                        self.loader.hangup();
                        break;
                    }
                }
            }
        }

        let outcome = match self.loader.state() {
            LoaderState::Done => LoaderOutcome::Completed(self.loader.final_size().unwrap_or(0)),
            LoaderState::Failed => LoaderOutcome::Failed(
                self.loader
                    .take_error()
                    .unwrap_or_else(|| LoaderError::Fatal("failure without error".into())),
            ),
            _ => LoaderOutcome::Stopped,
        };
        debug!(outcome = ?outcome, stats = ?self.loader.stats(), "Loader finished");
        (outcome, self.loader.into_hooks())
    }

    fn schedule_wakeup(&mut self) {
        let Some(delay) = self.loader.take_retry_delay() else {
            return;
        };
        let tx = self.tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(LoaderEvent::Wakeup);
                }
            }
        });
    }
}

/// Runs several actors on their own tasks and waits for all of them.
///
/// Outcomes are returned in input order. A panicked task counts as failed.
pub async fn run_all<H: LoaderHooks + 'static>(actors: Vec<LoaderActor<H>>) -> Vec<LoaderOutcome> {
    let tasks = actors.into_iter().map(LoaderActor::spawn);
    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                LoaderOutcome::Failed(LoaderError::Fatal(format!("loader task failed: {}", e)))
            })
        })
        .collect()
}
