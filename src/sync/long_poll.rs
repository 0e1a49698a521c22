//! Long-poll client.
//!
//! [`LongPollClient`] repeatedly asks the server for changes after its
//! watermark, with the server holding each request open until something
//! happens or the wait budget elapses. Every answered request advances the
//! watermark, including empty ones, so the server never rescans a window
//! the client has already covered.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{Activity, EventSink, InFlight, SyncEvent, SyncHandle, UpdateSource};
use crate::Result;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::models::{BranchId, PollData, PollOutcome, UpdateKind, Watermark};
use crate::transport::{OrderTransport, PollQuery, clamp_wait};

/// Tunables of the long-poll loop.
#[derive(Debug, Clone)]
pub struct LongPollOptions {
    /// Server-side wait budget per request (clamped to 60 s).
    pub wait: Duration,
    /// Allow-list of change kinds; `None` delivers everything.
    pub types: Option<Vec<UpdateKind>>,
    /// Pause between an answered request and the next one.
    pub delay: Duration,
    /// Pause after a failed request.
    pub error_backoff: Duration,
}

impl Default for LongPollOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(30),
            types: None,
            delay: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Client for `GET /v2/orders/poll`.
pub struct LongPollClient<T> {
    transport: Arc<T>,
    branch: BranchId,
    options: LongPollOptions,
    watermark: watch::Sender<Watermark>,
    last_error: watch::Sender<Option<String>>,
    in_flight: AtomicBool,
    events: EventSink,
}

impl<T: OrderTransport + 'static> LongPollClient<T> {
    /// Creates a client whose watermark starts at `clock`'s now.
    pub fn new(
        transport: Arc<T>,
        branch: BranchId,
        mut options: LongPollOptions,
        clock: &dyn Clock,
        events: EventSink,
    ) -> Self {
        options.wait = clamp_wait(options.wait);
        Self {
            transport,
            branch,
            options,
            watermark: watch::Sender::new(clock.now()),
            last_error: watch::Sender::new(None),
            in_flight: AtomicBool::new(false),
            events,
        }
    }

    pub fn branch(&self) -> &BranchId {
        &self.branch
    }

    pub fn options(&self) -> &LongPollOptions {
        &self.options
    }

    /// Current watermark.
    pub fn watermark(&self) -> Watermark {
        self.watermark.borrow().clone()
    }

    /// Observes watermark changes.
    pub fn subscribe_watermark(&self) -> watch::Receiver<Watermark> {
        self.watermark.subscribe()
    }

    /// Message of the most recent failure, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Moves the watermark forward to `to`; earlier values are ignored.
    pub fn seed(&self, to: &Watermark) -> bool {
        self.watermark.send_if_modified(|current| current.advance(to))
    }

    /// Overwrites the watermark unconditionally (manual refresh).
    pub fn reset(&self, to: Watermark) {
        self.watermark.send_replace(to);
    }

    /// Issues one long-poll and applies its result.
    ///
    /// Never fails: errors are reported as [`SyncEvent::Error`] and yield
    /// [`PollOutcome::empty`]. If another poll from this client is still
    /// outstanding, no request is made.
    pub async fn poll(&self) -> PollOutcome {
        match self.fetch().await {
            Ok(data) => self.accept(data),
            Err(SyncError::InFlight) => {
                debug!(branch = %self.branch, "Poll already in flight, skipping");
                PollOutcome::empty(self.watermark())
            }
            Err(e) => {
                self.report(e);
                PollOutcome::empty(self.watermark())
            }
        }
    }

    /// Sends one request for changes after the current watermark.
    ///
    /// Does not touch client state; pair with [`Self::accept`] or
    /// [`Self::report`].
    pub(crate) async fn fetch(&self) -> Result<PollData> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            return Err(SyncError::InFlight);
        };

        let query = PollQuery::new(
            self.branch.clone(),
            self.watermark(),
            self.options.wait,
            self.options.types.clone(),
        );
        debug!(branch = %self.branch, since = %query.since, "Long-polling for order updates");
        self.transport.poll(&query).await
    }

    /// Delivers an answered poll: one event for a non-empty batch, then the
    /// watermark moves to the response timestamp.
    pub(crate) fn accept(&self, data: PollData) -> PollOutcome {
        let PollData {
            updates,
            timestamp,
            timed_out,
            has_more,
        } = data;

        if !updates.is_empty() {
            info!(
                branch = %self.branch,
                count = updates.len(),
                "Received order updates"
            );
            let _ = self.events.send(SyncEvent::Updates {
                source: UpdateSource::LongPoll,
                updates: updates.clone(),
            });
        }

        self.seed(&timestamp);
        self.last_error.send_replace(None);

        PollOutcome {
            updates,
            watermark: self.watermark(),
            timed_out,
            has_more,
        }
    }

    /// Records a failed poll and surfaces it to the consumer.
    pub(crate) fn report(&self, err: SyncError) {
        if err.is_transient() {
            warn!(branch = %self.branch, "Long-poll failed: {err}");
        } else {
            error!(branch = %self.branch, "Long-poll failed: {err}");
        }
        self.last_error.send_replace(Some(err.to_string()));
        let _ = self.events.send(SyncEvent::Error {
            source: UpdateSource::LongPoll,
            error: err,
        });
    }

    /// Starts the long-poll loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let activity = Activity::new();
        let client = Arc::clone(self);
        let loop_activity = Arc::clone(&activity);
        let task = tokio::spawn(async move { client.run(&loop_activity).await });
        SyncHandle::new(activity, task)
    }

    async fn run(&self, activity: &Activity) {
        info!(branch = %self.branch, "Long-poll loop started");

        while activity.is_active() {
            let result = self.fetch().await;
            if !activity.is_active() {
                debug!(branch = %self.branch, "Discarding poll result after cancel");
                break;
            }

            let pause = match result {
                Ok(data) => {
                    let outcome = self.accept(data);
                    if outcome.has_more {
                        Duration::ZERO
                    } else {
                        self.options.delay
                    }
                }
                Err(SyncError::InFlight) => self.options.delay,
                Err(e) => {
                    self.report(e);
                    debug!(
                        backoff_secs = self.options.error_backoff.as_secs(),
                        "Backing off before retry"
                    );
                    self.options.error_backoff
                }
            };

            if !activity.pause(pause).await {
                break;
            }
        }

        info!(branch = %self.branch, "Long-poll loop stopped");
    }
}
