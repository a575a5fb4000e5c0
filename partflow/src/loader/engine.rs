//! The transfer-driving state machine.
//!
//! A [`FileLoader`] owns one transfer. It is re-entered by discrete events
//! (query results, grant changes, resume notices) and never blocks: every
//! network operation is handed to the transport and its result comes back
//! later as another event.
//!
//! # One pass of the loop
//!
//! ```text
//! check_loop ──► need check? ──► dispatch check queries (common key)
//!      │
//!      ▼
//! tracker ready? ──yes──► finish ──► on_ok ──► Done
//!      │ no
//!      ▼
//! before_start_parts
//!      │
//!      ▼
//! while unused budget >= part size:
//!     tracker.start_part ──► hooks.start_part ──► in-flight registry ──► transport
//!      │
//!      ▼
//! after_start_parts ──► report estimated limit
//! ```
//!
//! # Results
//!
//! ```text
//! result ──► remove from registry ──► release budget
//!              │
//!              ├─ failed & (canceled | should_restart_part) ──► part back to tracker
//!              │
//!              └─ otherwise ──► [reorder buffer] ──► process_part ──► on_part_ok ──► on_progress
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::event::LoaderEvent;
use super::hooks::LoaderHooks;
use super::types::{LoaderProgress, LoaderState, LocalFileLocation};
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult, NetError};
use crate::net::{NetQuery, ReplyTo, RequestKey, Transport};
use crate::ordered::OrderedEventsProcessor;
use crate::parts::{Part, PartTracker, PartsManager};
use crate::policy::Priority;
use crate::resource::{ResourceLink, ResourceState};

// =============================================================================
// Bookkeeping
// =============================================================================

/// One entry of the in-flight registry.
#[derive(Debug)]
struct InFlight {
    part: Part,
    ordered: bool,
    cancel: CancellationToken,
}

/// Counters collected over a loader's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Part queries handed to the transport.
    pub dispatched: u64,
    /// Parts confirmed through `process_part`.
    pub completed: u64,
    /// Completions that did not extend the ready prefix.
    pub out_of_order: u64,
    /// Parts released back to the tracker after a failure.
    pub restarted: u64,
    /// Results that matched no in-flight entry.
    pub stale: u64,
    /// Integrity-check queries handed to the transport.
    pub check_queries: u64,
}

impl LoaderStats {
    /// Share of completions that arrived out of order, in percent.
    pub fn out_of_order_rate(&self) -> f64 {
        if self.completed == 0 {
            return 0.0;
        }
        self.out_of_order as f64 / self.completed as f64 * 100.0
    }
}

// =============================================================================
// File Loader
// =============================================================================

/// Drives one transfer through its hooks.
///
/// All methods run to completion synchronously. Methods that change state
/// schedule a loop pass instead of recursing; pending passes run before the
/// method returns.
pub struct FileLoader<H: LoaderHooks> {
    hooks: H,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<LoaderEvent>,
    config: LoaderConfig,

    state: LoaderState,
    stop_flag: bool,
    loop_pending: bool,

    parts: Box<dyn PartTracker>,
    resources: ResourceState,
    resource_link: Option<ResourceLink>,

    next_request_id: u64,
    in_flight: BTreeMap<u64, InFlight>,
    common_in_flight: BTreeMap<u64, CancellationToken>,
    ordered_parts: OrderedEventsProcessor<(Part, NetQuery)>,

    start_failures: HashMap<usize, u32>,
    start_blocked: bool,
    retry_delay: Option<Duration>,

    pending_location: Option<LocalFileLocation>,
    final_size: Option<u64>,
    error: Option<LoaderError>,
    stats: LoaderStats,
}

impl<H: LoaderHooks> FileLoader<H> {
    /// Creates a loader using the default [`PartsManager`].
    ///
    /// Results are delivered through `events`, which must feed back into
    /// [`FileLoader::handle`].
    pub fn new(
        hooks: H,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<LoaderEvent>,
        config: LoaderConfig,
    ) -> Self {
        let parts = Box::new(PartsManager::with_max_part_count(config.max_part_count));
        let resources = ResourceState::with_limit(config.standalone_limit);
        Self {
            hooks,
            transport,
            events,
            config,
            state: LoaderState::Init,
            stop_flag: false,
            loop_pending: false,
            parts,
            resources,
            resource_link: None,
            next_request_id: 1,
            in_flight: BTreeMap::new(),
            common_in_flight: BTreeMap::new(),
            ordered_parts: OrderedEventsProcessor::new(0),
            start_failures: HashMap::new(),
            start_blocked: false,
            retry_delay: None,
            pending_location: None,
            final_size: None,
            error: None,
            stats: LoaderStats::default(),
        }
    }

    /// Replaces the part tracker. Only meaningful before [`FileLoader::start`].
    pub fn with_part_tracker(mut self, parts: Box<dyn PartTracker>) -> Self {
        self.parts = parts;
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Whether the loader is inert.
    pub fn is_stopped(&self) -> bool {
        self.stop_flag
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn into_hooks(self) -> H {
        self.hooks
    }

    pub fn resources(&self) -> &ResourceState {
        &self.resources
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    /// Number of part queries currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of integrity-check queries currently in flight.
    pub fn check_in_flight_count(&self) -> usize {
        self.common_in_flight.len()
    }

    pub fn part_tracker(&self) -> &dyn PartTracker {
        self.parts.as_ref()
    }

    /// Size reported to `on_ok`, once done.
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    /// Takes the terminal error, once failed.
    pub fn take_error(&mut self) -> Option<LoaderError> {
        self.error.take()
    }

    /// Takes the delay after which a [`LoaderEvent::Wakeup`] is wanted.
    pub fn take_retry_delay(&mut self) -> Option<Duration> {
        self.retry_delay.take()
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> LoaderProgress {
        LoaderProgress {
            part_count: self.parts.part_count(),
            part_size: self.parts.part_size(),
            ready_part_count: self.parts.ready_count(),
            is_ready: self.parts.ready(),
            ready_size: self.parts.ready_size(),
        }
    }

    // -------------------------------------------------------------------------
    // Inbound operations
    // -------------------------------------------------------------------------

    /// Initializes the transfer and runs the first pass.
    pub fn start(&mut self) {
        if self.state != LoaderState::Init || self.stop_flag {
            warn!(state = %self.state, "Loader already started");
            return;
        }
        match self.init() {
            Ok(()) => self.schedule_loop(),
            Err(err) => self.fail(err),
        }
        self.run_pending();
    }

    /// Routes one inbound event.
    pub fn handle(&mut self, event: LoaderEvent) {
        match event {
            LoaderEvent::QueryResult(query) => self.on_query_result(query),
            LoaderEvent::UpdateResources(state) => self.update_resources(state),
            LoaderEvent::UpdatePriority(priority) => self.update_priority(priority),
            LoaderEvent::UpdateLocalLocation(location) => self.update_local_location(location),
            LoaderEvent::SetResourceManager(link) => self.set_resource_manager(link),
            LoaderEvent::Wakeup => self.wakeup(),
            LoaderEvent::Hangup => self.hangup(),
        }
    }

    /// Absorbs the result of a dispatched query.
    pub fn on_query_result(&mut self, query: NetQuery) {
        if self.stop_flag {
            trace!(key = %query.key(), "Result after stop dropped");
            return;
        }
        match self.on_result(query) {
            Ok(()) => {
                self.update_estimated_limit();
                self.schedule_loop();
            }
            Err(err) => self.fail(err),
        }
        self.run_pending();
    }

    /// Takes a grant pushed by the resource manager (or set by the owner).
    pub fn update_resources(&mut self, state: ResourceState) {
        if self.stop_flag {
            return;
        }
        self.resources.apply_grant(&state);
        debug!(limit = self.resources.limit(), using = self.resources.using(), "Grant updated");
        self.schedule_loop();
        self.run_pending();
    }

    /// Forwards a priority hint to the resource manager.
    pub fn update_priority(&mut self, priority: Priority) {
        if self.stop_flag {
            return;
        }
        match &self.resource_link {
            Some(link) => {
                link.set_priority(priority);
            }
            None => debug!(%priority, "No resource manager, priority ignored"),
        }
        self.schedule_loop();
        self.run_pending();
    }

    /// Reconciles a local copy of the file into the part state.
    ///
    /// Before [`FileLoader::start`] the location is kept and applied right
    /// after initialization, ahead of the first dispatch.
    pub fn update_local_location(&mut self, location: LocalFileLocation) {
        if self.stop_flag {
            return;
        }
        if self.state == LoaderState::Init {
            self.pending_location = Some(location);
            return;
        }
        match self.apply_local_location(&location) {
            Ok(()) => {
                self.update_estimated_limit();
                self.schedule_loop();
            }
            Err(err) => self.fail(err),
        }
        self.run_pending();
    }

    /// Attaches a shared resource manager.
    ///
    /// The standalone grant is dropped; dispatch resumes once the manager
    /// pushes a grant back.
    pub fn set_resource_manager(&mut self, link: ResourceLink) {
        if self.stop_flag {
            return;
        }
        debug!(loader_id = link.id(), "Resource manager attached");
        self.resource_link = Some(link);
        self.resources.apply_grant(&ResourceState::default());
        self.report_resources();
        self.schedule_loop();
        self.run_pending();
    }

    /// Ends a start-part backoff.
    pub fn wakeup(&mut self) {
        if self.stop_flag {
            return;
        }
        self.start_blocked = false;
        self.schedule_loop();
        self.run_pending();
    }

    /// Stops the transfer without a terminal callback.
    pub fn hangup(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!(
            in_flight = self.in_flight.len(),
            ready_size = self.parts.ready_size(),
            "Transfer stopped"
        );
        self.state = LoaderState::Stopped;
        self.teardown();
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn init(&mut self) -> LoaderResult<()> {
        let info = self.hooks.init()?;
        self.parts.configure(&info)?;
        self.resources.set_unit_size(self.parts.part_size());

        if self.config.ordered {
            for part_id in self.parts.ready_part_ids() {
                self.ordered_parts.skip(part_id as u64);
            }
        }

        self.state = LoaderState::Dispatching;
        info!(
            size = info.size,
            part_size = self.parts.part_size(),
            part_count = self.parts.part_count(),
            ready_parts = self.parts.ready_count(),
            ordered = self.config.ordered,
            "Transfer started"
        );

        if let Some(location) = self.pending_location.take() {
            self.apply_local_location(&location)?;
        }
        self.update_estimated_limit();
        Ok(())
    }

    fn complete(&mut self, size: u64) {
        self.state = LoaderState::Done;
        self.final_size = Some(size);
        info!(
            size,
            parts = self.stats.completed,
            restarted = self.stats.restarted,
            out_of_order_pct = self.stats.out_of_order_rate(),
            "Transfer complete"
        );
        self.teardown();
    }

    /// Terminal failure; reported at most once.
    fn fail(&mut self, err: LoaderError) {
        if self.state.is_terminal() {
            debug!(error = %err, state = %self.state, "Error after terminal state ignored");
            return;
        }
        error!(error = %err, ready_size = self.parts.ready_size(), "Transfer failed");
        self.state = LoaderState::Failed;
        self.teardown();
        self.hooks.on_error(&err);
        self.error = Some(err);
    }

    /// Cancels in-flight work and releases held resources. Idempotent.
    fn teardown(&mut self) {
        if std::mem::replace(&mut self.stop_flag, true) {
            return;
        }
        self.loop_pending = false;
        for (_, entry) in std::mem::take(&mut self.in_flight) {
            entry.cancel.cancel();
        }
        for (_, cancel) in std::mem::take(&mut self.common_in_flight) {
            cancel.cancel();
        }
        self.ordered_parts.clear();
        if let Some(mut link) = self.resource_link.take() {
            link.release();
        }
        self.hooks.keep_fd_flag(false);
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    fn schedule_loop(&mut self) {
        self.loop_pending = true;
    }

    fn run_pending(&mut self) {
        if self.state == LoaderState::Init {
            return;
        }
        while std::mem::take(&mut self.loop_pending) {
            if self.stop_flag {
                return;
            }
            if let Err(err) = self.do_loop() {
                self.fail(err);
            }
        }
    }

    fn do_loop(&mut self) -> LoaderResult<()> {
        let fully_ready = self.parts.is_fully_ready();
        if fully_ready && self.state == LoaderState::Dispatching {
            debug!(size = ?self.parts.size(), "All parts ready, checking");
            self.state = LoaderState::Checking;
        }

        let check = self.hooks.check_loop(
            self.parts.checked_prefix_size(),
            self.parts.unchecked_ready_prefix_size(),
            fully_ready,
        )?;
        if check.changed {
            self.report_progress();
        }
        for query in check.queries {
            self.dispatch_common(query);
        }
        if check.need_check {
            self.parts.set_need_check(true);
            self.parts.set_checked_prefix_size(check.checked_prefix_size);
        }

        if self.parts.ready() {
            self.parts.finish()?;
            let size = self.parts.size().unwrap_or_else(|| self.parts.ready_size());
            self.hooks.on_ok(size)?;
            self.complete(size);
            return Ok(());
        }

        self.hooks.before_start_parts()?;
        let result = self.start_parts();
        self.hooks.after_start_parts();
        result?;

        self.update_estimated_limit();
        Ok(())
    }

    fn start_parts(&mut self) -> LoaderResult<()> {
        while !self.start_blocked {
            if self.resources.unused() < self.parts.part_size() {
                trace!(
                    unused = self.resources.unused(),
                    part_size = self.parts.part_size(),
                    "Budget exhausted"
                );
                break;
            }
            let Some(part) = self.parts.start_part()? else {
                break;
            };

            let started = match self.hooks.start_part(part, self.parts.part_count()) {
                Ok(started) => started,
                Err(err) if !err.is_fatal() => {
                    self.parts.on_part_failed(part.id);
                    return self.defer_start(part, err);
                }
                Err(err) => return Err(err),
            };
            self.start_failures.remove(&part.id);

            let request_id = self.next_request_id;
            self.next_request_id += 1;
            let mut query = started.query;
            query.set_key(RequestKey::Part(request_id));

            self.resources.start_use(part.size);
            self.in_flight.insert(
                request_id,
                InFlight {
                    part,
                    ordered: started.ordered,
                    cancel: query.cancellation().clone(),
                },
            );
            self.stats.dispatched += 1;
            debug!(
                request_id,
                part_id = part.id,
                offset = part.offset,
                part_size = part.size,
                using = self.resources.using(),
                limit = self.resources.limit(),
                "Part dispatched"
            );
            self.transport
                .dispatch(query, ReplyTo::new(self.events.clone()));
        }
        Ok(())
    }

    /// Backs off after a transient `start_part` failure.
    fn defer_start(&mut self, part: Part, err: LoaderError) -> LoaderResult<()> {
        let attempts = self.start_failures.entry(part.id).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;

        match self.config.start_retry.pause_after(attempts) {
            Some(delay) => {
                warn!(part_id = part.id, attempts, ?delay, error = %err, "Part start failed, backing off");
                self.pause_starts(delay);
                Ok(())
            }
            None => Err(LoaderError::RetriesExhausted {
                part_id: part.id,
                attempts,
            }),
        }
    }

    /// Holds back new dispatches until a [`LoaderEvent::Wakeup`].
    fn pause_starts(&mut self, delay: Duration) {
        self.start_blocked = true;
        self.retry_delay = Some(self.retry_delay.map_or(delay, |pending| pending.max(delay)));
    }

    fn dispatch_common(&mut self, mut query: NetQuery) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        query.set_key(RequestKey::Common(request_id));
        self.common_in_flight
            .insert(request_id, query.cancellation().clone());
        self.stats.check_queries += 1;
        trace!(request_id, request = ?query.request(), "Check query dispatched");
        self.transport
            .dispatch(query, ReplyTo::new(self.events.clone()));
    }

    // -------------------------------------------------------------------------
    // Results
    // -------------------------------------------------------------------------

    fn on_result(&mut self, query: NetQuery) -> LoaderResult<()> {
        let request_id = match query.key() {
            RequestKey::Common(request_id) => {
                if self.common_in_flight.remove(&request_id).is_none() {
                    self.stats.stale += 1;
                    warn!(request_id, "Check result for unknown request ignored");
                    return Ok(());
                }
                return self.hooks.process_check_query(query);
            }
            RequestKey::Part(request_id) => request_id,
        };

        let Some(entry) = self.in_flight.remove(&request_id) else {
            self.stats.stale += 1;
            warn!(request_id, "Result for unknown request ignored");
            return Ok(());
        };
        let part = entry.part;
        self.resources.stop_use(part.size);

        if let Some(net_error) = query.error() {
            let canceled = matches!(net_error, NetError::Canceled);
            if canceled || self.hooks.should_restart_part(part, &query)? {
                let pause = if canceled {
                    Duration::ZERO
                } else {
                    self.hooks.restart_pause(part)
                };
                debug!(request_id, part_id = part.id, error = %net_error, ?pause, "Part restarted");
                self.stats.restarted += 1;
                self.parts.on_part_failed(part.id);
                if !pause.is_zero() {
                    self.pause_starts(pause);
                }
                return Ok(());
            }
        }

        if self.config.ordered && entry.ordered {
            let mut released = Vec::new();
            let accepted = self
                .ordered_parts
                .add_with(part.id as u64, (part, query), |_, event| released.push(event));
            if !accepted {
                warn!(part_id = part.id, "Part result already released, ignored");
            }
            for (part, query) in released {
                self.process_part(part, query)?;
            }
        } else {
            self.process_part(part, query)?;
            if self.config.ordered {
                self.skip_sequence(part.id)?;
            }
        }
        Ok(())
    }

    fn skip_sequence(&mut self, part_id: usize) -> LoaderResult<()> {
        for (_, (part, query)) in self.ordered_parts.skip(part_id as u64) {
            self.process_part(part, query)?;
        }
        Ok(())
    }

    fn process_part(&mut self, part: Part, query: NetQuery) -> LoaderResult<()> {
        let prefix_before = self.parts.ready_prefix_count();
        let size = self.hooks.process_part(part, query)?;
        self.parts.on_part_ok(part, size)?;

        self.stats.completed += 1;
        if self.parts.ready_prefix_count() == prefix_before {
            self.stats.out_of_order += 1;
        }
        trace!(part_id = part.id, size, ready_size = self.parts.ready_size(), "Part ready");
        self.report_progress();
        Ok(())
    }

    fn apply_local_location(&mut self, location: &LocalFileLocation) -> LoaderResult<()> {
        let prefix = match self.hooks.on_update_local_location(location) {
            Ok(prefix) => prefix,
            Err(err) if err.is_unsupported() => {
                debug!("Resume from a local copy not supported");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !prefix.is_ready {
            debug!(prefix_size = prefix.size, "Local prefix not trusted");
            return Ok(());
        }

        let changed = self.parts.set_known_prefix(prefix.size, prefix.is_ready)?;
        if changed.is_empty() {
            return Ok(());
        }
        info!(prefix_size = prefix.size, parts = changed.len(), "Resumed from local copy");
        if self.config.ordered {
            for part_id in changed {
                self.skip_sequence(part_id)?;
            }
        }
        self.report_progress();
        Ok(())
    }

    fn report_progress(&mut self) {
        let progress = self.progress();
        self.hooks.on_progress(progress);
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    fn update_estimated_limit(&mut self) {
        if self.stop_flag || self.state == LoaderState::Init {
            return;
        }
        let extra = self.parts.estimated_extra();
        if !self.resources.update_estimated_limit(extra) {
            return;
        }
        trace!(
            extra,
            estimated = self.resources.estimated_limit(),
            "Estimated limit changed"
        );
        self.report_resources();
    }

    fn report_resources(&mut self) {
        if let Some(link) = &self.resource_link {
            let part_size = self.parts.part_size();
            self.hooks
                .keep_fd_flag(part_size > 0 && self.resources.limit() >= part_size);
            link.report(&self.resources);
        }
    }
}

impl<H: LoaderHooks> std::fmt::Debug for FileLoader<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLoader")
            .field("state", &self.state)
            .field("in_flight", &self.in_flight.len())
            .field("resources", &self.resources)
            .field("stats", &self.stats)
            .finish()
    }
}
