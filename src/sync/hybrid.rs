//! Hybrid reconciliation controller.
//!
//! Chooses between the externally owned live channel and the controller's
//! own polling, and within polling between cheap change detection
//! (*watching*) and low-latency long-polling (*streaming*).
//!
//! ```text
//!  live Connected && prefer_websocket ──► Websocket  (no polling at all)
//!  otherwise, polling_enabled         ──► Polling
//!  otherwise                          ──► None
//!
//!  Polling:  Watching ──changes detected / demand──► Streaming
//!            Streaming ──N empty polls, no demand──► Watching
//! ```
//!
//! Only one polling task exists at a time and it runs one phase at a time,
//! so the two delegate clients never query the server concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    Activity, ChangeDetector, ChangeDetectorOptions, EventSink, LongPollClient, LongPollOptions,
    RefetchReason, SyncEvent, SyncHandle,
};
use crate::Result;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::live::LiveStatus;
use crate::models::{BranchId, Watermark};
use crate::transport::OrderTransport;

/// Which delivery mechanism is authoritative right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Websocket,
    Polling,
    None,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Websocket => "websocket",
            ConnectionMode::Polling => "polling",
            ConnectionMode::None => "none",
        }
    }
}

/// Sub-state of [`ConnectionMode::Polling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingPhase {
    /// Periodic change checks only.
    Watching,
    /// Continuous long-polling.
    Streaming,
}

/// Applies the mode rule to a live-channel status.
pub fn resolve_mode(
    status: LiveStatus,
    prefer_websocket: bool,
    polling_enabled: bool,
) -> ConnectionMode {
    if status == LiveStatus::Connected && prefer_websocket {
        ConnectionMode::Websocket
    } else if polling_enabled {
        ConnectionMode::Polling
    } else {
        ConnectionMode::None
    }
}

/// Tunables of the hybrid controller.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub prefer_websocket: bool,
    pub polling_enabled: bool,
    /// Long-poll settings used while streaming.
    pub long_poll: LongPollOptions,
    /// Change-check settings used while watching.
    pub check: ChangeDetectorOptions,
    /// Consecutive empty long-polls, with no demand held, before falling
    /// back to watching. `0` never falls back.
    pub demote_after_idle: u32,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            prefer_websocket: true,
            polling_enabled: true,
            long_poll: LongPollOptions {
                delay: Duration::from_secs(2),
                error_backoff: Duration::from_secs(5),
                ..LongPollOptions::default()
            },
            check: ChangeDetectorOptions::default(),
            demote_after_idle: 3,
        }
    }
}

/// Keeps the controller streaming while alive.
///
/// Held by consumers that need low-latency updates (an open order board,
/// for instance). Dropping the last guard lets the controller fall back to
/// change detection once the stream goes quiet.
#[derive(Debug)]
pub struct DemandGuard {
    demand: watch::Sender<usize>,
}

impl Drop for DemandGuard {
    fn drop(&mut self) {
        self.demand.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Arbitrates between the live channel, change detection, and long-polling
/// for one branch.
pub struct HybridController<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for HybridController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    branch: BranchId,
    options: HybridOptions,
    clock: Arc<dyn Clock>,
    long_poll: LongPollClient<T>,
    detector: ChangeDetector<T>,
    mode: watch::Sender<ConnectionMode>,
    phase: watch::Sender<Option<PollingPhase>>,
    demand: watch::Sender<usize>,
    supervising: AtomicBool,
    events: EventSink,
}

impl<T: OrderTransport + 'static> HybridController<T> {
    pub fn new(
        transport: Arc<T>,
        branch: BranchId,
        options: HybridOptions,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        let long_poll = LongPollClient::new(
            Arc::clone(&transport),
            branch.clone(),
            options.long_poll.clone(),
            clock.as_ref(),
            events.clone(),
        );
        let detector = ChangeDetector::new(
            transport,
            branch.clone(),
            options.check.clone(),
            clock.as_ref(),
            events.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                branch,
                options,
                clock,
                long_poll,
                detector,
                mode: watch::Sender::new(ConnectionMode::None),
                phase: watch::Sender::new(None),
                demand: watch::Sender::new(0),
                supervising: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Starts following `status`, recomputing the mode on every change.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InFlight`] if the controller is already running.
    pub fn start(&self, status: watch::Receiver<LiveStatus>) -> Result<SyncHandle> {
        if self
            .inner
            .supervising
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InFlight);
        }

        let activity = Activity::new();
        let inner = Arc::clone(&self.inner);
        let loop_activity = Arc::clone(&activity);
        let task = tokio::spawn(async move {
            Inner::supervise(&inner, status, &loop_activity).await;
            inner.supervising.store(false, Ordering::Release);
        });
        Ok(SyncHandle::new(activity, task))
    }

    /// Resets both watermarks to now and asks consumers for a full refetch.
    pub fn force_refresh(&self) {
        let now = self.inner.clock.now();
        info!(branch = %self.inner.branch, watermark = %now, "Manual refresh requested");
        self.inner.long_poll.reset(now.clone());
        self.inner.detector.reset(now);
        let _ = self
            .inner
            .events
            .send(SyncEvent::RefetchRequested(RefetchReason::Manual));
    }

    /// Registers consumer interest in low-latency updates.
    pub fn hold_demand(&self) -> DemandGuard {
        self.inner.demand.send_modify(|n| *n += 1);
        DemandGuard {
            demand: self.inner.demand.clone(),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        *self.inner.mode.borrow()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<ConnectionMode> {
        self.inner.mode.subscribe()
    }

    /// Current polling phase, `None` outside [`ConnectionMode::Polling`].
    pub fn phase(&self) -> Option<PollingPhase> {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Option<PollingPhase>> {
        self.inner.phase.subscribe()
    }

    pub fn long_poll(&self) -> &LongPollClient<T> {
        &self.inner.long_poll
    }

    pub fn detector(&self) -> &ChangeDetector<T> {
        &self.inner.detector
    }
}

impl<T: OrderTransport + 'static> Inner<T> {
    async fn supervise(
        self: &Arc<Self>,
        mut status: watch::Receiver<LiveStatus>,
        activity: &Activity,
    ) {
        let mut status_open = true;
        let mut current: Option<ConnectionMode> = None;
        let mut poller: Option<SyncHandle> = None;

        while activity.is_active() {
            let live = if status_open {
                *status.borrow_and_update()
            } else {
                LiveStatus::Disconnected
            };
            let next = resolve_mode(
                live,
                self.options.prefer_websocket,
                self.options.polling_enabled,
            );

            if current != Some(next) {
                info!(
                    branch = %self.branch,
                    live = live.as_str(),
                    mode = next.as_str(),
                    "Connection mode changed"
                );
                self.mode.send_replace(next);
                if let Some(previous) = poller.take() {
                    previous.stop().await;
                }
                if next == ConnectionMode::Polling {
                    poller = Some(self.spawn_polling());
                }
                current = Some(next);
            }

            tokio::select! {
                changed = status.changed(), if status_open => {
                    if changed.is_err() {
                        info!(
                            branch = %self.branch,
                            "Live status source closed, treating as disconnected"
                        );
                        status_open = false;
                    }
                }
                () = activity.cancelled() => break,
            }
        }

        if let Some(poller) = poller.take() {
            poller.stop().await;
        }
        self.mode.send_replace(ConnectionMode::None);
        info!(branch = %self.branch, "Hybrid controller stopped");
    }

    fn spawn_polling(self: &Arc<Self>) -> SyncHandle {
        let activity = Activity::new();
        let inner = Arc::clone(self);
        let loop_activity = Arc::clone(&activity);
        let task = tokio::spawn(async move {
            inner.run_polling(&loop_activity).await;
            inner.phase.send_replace(None);
        });
        SyncHandle::new(activity, task)
    }

    fn set_phase(&self, phase: PollingPhase) {
        let changed = self.phase.send_if_modified(|current| {
            let changed = *current != Some(phase);
            *current = Some(phase);
            changed
        });
        if changed {
            debug!(branch = %self.branch, ?phase, "Polling phase changed");
        }
    }

    fn demand(&self) -> usize {
        *self.demand.borrow()
    }

    /// Switches to streaming, carrying `since` into the long-poll client so
    /// the changes that triggered the switch are delivered.
    fn promote(&self, since: &Watermark) {
        self.long_poll.seed(since);
        info!(branch = %self.branch, since = %since, "Promoting to long-poll");
        self.set_phase(PollingPhase::Streaming);
    }

    /// Falls back to watching from where the long-poll stopped.
    fn demote(&self) {
        let watermark = self.long_poll.watermark();
        self.detector.seed(&watermark);
        info!(branch = %self.branch, watermark = %watermark, "Demoting to change detection");
        self.set_phase(PollingPhase::Watching);
    }

    async fn run_polling(&self, activity: &Activity) {
        let mut demand = self.demand.subscribe();
        let mut idle_polls: u32 = 0;

        if self.demand() > 0 {
            self.promote(&self.detector.watermark());
        } else {
            self.set_phase(PollingPhase::Watching);
        }

        while activity.is_active() {
            let phase = self.phase().unwrap_or(PollingPhase::Watching);

            let pause = match phase {
                PollingPhase::Watching => {
                    if self.demand() > 0 {
                        self.promote(&self.detector.watermark());
                        idle_polls = 0;
                        continue;
                    }

                    let result = self.detector.fetch().await;
                    if !activity.is_active() {
                        debug!(branch = %self.branch, "Discarding change check after cancel");
                        break;
                    }
                    match result {
                        Ok(summary) => {
                            let summary = self.detector.accept(summary);
                            if summary.change_count > 0 {
                                self.promote(&summary.since);
                                idle_polls = 0;
                                Duration::ZERO
                            } else {
                                self.options.check.interval
                            }
                        }
                        Err(SyncError::InFlight) => self.options.check.interval,
                        Err(e) => {
                            self.detector.report(e);
                            self.options.check.interval
                        }
                    }
                }
                PollingPhase::Streaming => {
                    let result = self.long_poll.fetch().await;
                    if !activity.is_active() {
                        debug!(branch = %self.branch, "Discarding poll result after cancel");
                        break;
                    }
                    match result {
                        Ok(data) => {
                            let outcome = self.long_poll.accept(data);
                            if outcome.updates.is_empty() {
                                idle_polls = idle_polls.saturating_add(1);
                            } else {
                                idle_polls = 0;
                                let refetch =
                                    SyncEvent::RefetchRequested(RefetchReason::PolledUpdates);
                                let _ = self.events.send(refetch);
                            }

                            let quiet = self.options.demote_after_idle > 0
                                && idle_polls >= self.options.demote_after_idle
                                && self.demand() == 0;
                            if quiet {
                                self.demote();
                                idle_polls = 0;
                                self.options.check.interval
                            } else if outcome.has_more {
                                Duration::ZERO
                            } else {
                                self.options.long_poll.delay
                            }
                        }
                        Err(SyncError::InFlight) => self.options.long_poll.delay,
                        Err(e) => {
                            self.long_poll.report(e);
                            self.options.long_poll.error_backoff
                        }
                    }
                }
            };

            let keep_going = if self.phase() == Some(PollingPhase::Watching) {
                let demand_raised = async {
                    let _ = demand.wait_for(|n| *n > 0).await;
                };
                tokio::select! {
                    keep = activity.pause(pause) => keep,
                    () = demand_raised => activity.is_active(),
                }
            } else {
                activity.pause(pause).await
            };
            if !keep_going {
                break;
            }
        }
    }

    fn phase(&self) -> Option<PollingPhase> {
        *self.phase.borrow()
    }
}
