//! Change-detection client.
//!
//! [`ChangeDetector`] runs a cheap check on a fixed interval asking only
//! whether anything changed after its watermark and how much. It never
//! transfers orders; consumers use the signal to decide whether a refetch
//! or a switch to long-polling is worth it.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{Activity, EventSink, InFlight, SyncEvent, SyncHandle, UpdateSource};
use crate::Result;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::models::{BranchId, ChangeSummary, Watermark};
use crate::transport::{ChangeQuery, DEFAULT_CHECK_TIMEOUT, OrderTransport};

/// Tunables of the change-detection timer.
#[derive(Debug, Clone)]
pub struct ChangeDetectorOptions {
    /// Time between checks.
    pub interval: Duration,
    /// Budget for a single check request.
    pub timeout: Duration,
}

impl Default for ChangeDetectorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

/// Observable result of the latest check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeState {
    pub has_changes: bool,
    pub change_count: u64,
    pub last_error: Option<String>,
}

/// Client for `GET /v2/orders/changes`.
pub struct ChangeDetector<T> {
    transport: Arc<T>,
    branch: BranchId,
    options: ChangeDetectorOptions,
    watermark: watch::Sender<Watermark>,
    state: watch::Sender<ChangeState>,
    in_flight: AtomicBool,
    events: EventSink,
}

impl<T: OrderTransport + 'static> ChangeDetector<T> {
    /// Creates a detector whose watermark starts at `clock`'s now.
    pub fn new(
        transport: Arc<T>,
        branch: BranchId,
        options: ChangeDetectorOptions,
        clock: &dyn Clock,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            branch,
            options,
            watermark: watch::Sender::new(clock.now()),
            state: watch::Sender::new(ChangeState::default()),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn options(&self) -> &ChangeDetectorOptions {
        &self.options
    }

    /// Current watermark.
    pub fn watermark(&self) -> Watermark {
        self.watermark.borrow().clone()
    }

    /// Result of the latest check.
    pub fn state(&self) -> ChangeState {
        self.state.borrow().clone()
    }

    /// Observes check results.
    pub fn subscribe_state(&self) -> watch::Receiver<ChangeState> {
        self.state.subscribe()
    }

    /// Moves the watermark forward to `to`; earlier values are ignored.
    pub fn seed(&self, to: &Watermark) -> bool {
        self.watermark.send_if_modified(|current| current.advance(to))
    }

    /// Overwrites the watermark unconditionally (manual refresh).
    pub fn reset(&self, to: Watermark) {
        self.watermark.send_replace(to);
    }

    /// Runs one check and applies its result.
    ///
    /// Never fails: errors are reported as [`SyncEvent::Error`] and yield
    /// [`ChangeSummary::unchanged`] at the current watermark.
    pub async fn check(&self) -> ChangeSummary {
        match self.fetch().await {
            Ok(summary) => self.accept(summary),
            Err(SyncError::InFlight) => {
                debug!(branch = %self.branch, "Change check already in flight, skipping");
                ChangeSummary::unchanged(self.watermark())
            }
            Err(e) => {
                self.report(e);
                ChangeSummary::unchanged(self.watermark())
            }
        }
    }

    pub(crate) async fn fetch(&self) -> Result<ChangeSummary> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            return Err(SyncError::InFlight);
        };

        let query = ChangeQuery {
            branch: self.branch.clone(),
            since: self.watermark(),
            timeout: self.options.timeout,
        };
        debug!(branch = %self.branch, since = %query.since, "Checking for order changes");
        self.transport.check_changes(&query).await
    }

    /// Records a check result, advances the watermark, and signals the
    /// consumer only when something changed.
    pub(crate) fn accept(&self, summary: ChangeSummary) -> ChangeSummary {
        self.state.send_replace(ChangeState {
            has_changes: summary.has_changes,
            change_count: summary.change_count,
            last_error: None,
        });
        self.seed(&summary.timestamp);

        if summary.change_count > 0 {
            info!(
                branch = %self.branch,
                count = summary.change_count,
                "Order changes detected"
            );
            let _ = self.events.send(SyncEvent::ChangesDetected(summary.clone()));
        }
        summary
    }

    pub(crate) fn report(&self, err: SyncError) {
        warn!(branch = %self.branch, "Change check failed: {err}");
        self.state
            .send_modify(|state| state.last_error = Some(err.to_string()));
        let _ = self.events.send(SyncEvent::Error {
            source: UpdateSource::ChangeCheck,
            error: err,
        });
    }

    /// Starts checking on a fixed interval; the first check runs at once.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let activity = Activity::new();
        let detector = Arc::clone(self);
        let loop_activity = Arc::clone(&activity);
        let task = tokio::spawn(async move { detector.run(&loop_activity).await });
        SyncHandle::new(activity, task)
    }

    async fn run(&self, activity: &Activity) {
        info!(
            branch = %self.branch,
            interval_secs = self.options.interval.as_secs(),
            "Change detection started"
        );
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = activity.cancelled() => break,
            }

            let result = self.fetch().await;
            if !activity.is_active() {
                debug!(branch = %self.branch, "Discarding change check after cancel");
                break;
            }
            match result {
                Ok(summary) => {
                    self.accept(summary);
                }
                Err(SyncError::InFlight) => {}
                Err(e) => self.report(e),
            }
        }

        info!(branch = %self.branch, "Change detection stopped");
    }
}
