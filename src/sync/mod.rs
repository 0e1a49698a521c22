//! Order update synchronization: long-poll, change detection, and the
//! hybrid controller that arbitrates between them and a live channel.
//!
//! - [`long_poll`] - blocking "give me changes since X" loop
//! - [`change_detection`] - cheap periodic "did anything change" checks
//! - [`hybrid`] - mode selection and phase switching between the two
//!
//! All clients report through a single [`SyncEvent`] channel. Loops are
//! cancelled cooperatively through the [`SyncHandle`] returned by `start`.

pub mod change_detection;
pub mod hybrid;
pub mod long_poll;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::models::{ChangeSummary, UpdateEnvelope};

pub use change_detection::{ChangeDetector, ChangeDetectorOptions, ChangeState};
pub use hybrid::{ConnectionMode, DemandGuard, HybridController, HybridOptions, PollingPhase};
pub use long_poll::{LongPollClient, LongPollOptions};

/// Where a [`SyncEvent`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    LongPoll,
    ChangeCheck,
    LiveChannel,
}

/// Why a full refetch of the order list is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    /// The user asked for a manual refresh.
    Manual,
    /// The polling loop delivered a batch; snapshot-only consumers reload.
    PolledUpdates,
}

/// Notifications delivered to the consumer.
#[derive(Debug)]
pub enum SyncEvent {
    /// An ordered batch of changes, delivered once per response.
    Updates {
        source: UpdateSource,
        updates: Vec<UpdateEnvelope>,
    },
    /// A change check found `change_count > 0`.
    ChangesDetected(ChangeSummary),
    /// Consumers holding full snapshots should reload them.
    RefetchRequested(RefetchReason),
    /// A request failed; the loop that issued it keeps running.
    Error {
        source: UpdateSource,
        error: SyncError,
    },
}

/// Sending half of the consumer's event channel.
pub type EventSink = mpsc::UnboundedSender<SyncEvent>;

/// Cooperative cancellation flag shared between a loop and its handle.
#[derive(Debug)]
pub(crate) struct Activity {
    active: AtomicBool,
    wake: Notify,
}

impl Activity {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            wake: Notify::new(),
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clears the flag and wakes a loop sleeping in [`Activity::pause`].
    pub(crate) fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Sleeps for `delay`, returning early on cancellation.
    ///
    /// Returns whether the loop should keep going.
    pub(crate) async fn pause(&self, delay: Duration) -> bool {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_active() {
            return false;
        }
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = &mut notified => {}
            }
        }
        self.is_active()
    }

    /// Resolves once the flag has been cleared.
    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_active() {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to a running sync loop.
///
/// Cancelling stops the loop from scheduling another request; a request
/// already in flight is allowed to finish and its result is discarded.
#[derive(Debug)]
pub struct SyncHandle {
    activity: Arc<Activity>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub(crate) fn new(activity: Arc<Activity>, task: JoinHandle<()>) -> Self {
        Self { activity, task }
    }

    /// Stops scheduling further iterations. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.activity.cancel();
    }

    /// Returns `true` until the handle is cancelled.
    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    /// Returns `true` once the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels and waits for the loop, including any in-flight request.
    pub async fn stop(self) {
        self.activity.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("sync loop panicked: {e}");
        }
    }
}

/// Marks a client as having a request outstanding; released on drop.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    /// Claims the flag, or returns `None` if a request is already running.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pause_returns_early_on_cancel() {
        let activity = Activity::new();
        let waiter = {
            let activity = activity.clone();
            tokio::spawn(async move { activity.pause(Duration::from_secs(3600)).await })
        };
        tokio::task::yield_now().await;

        activity.cancel();
        let keep_going = waiter.await.unwrap();
        assert!(!keep_going);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_completes_when_active() {
        let activity = Activity::new();
        assert!(activity.pause(Duration::from_secs(1)).await);
    }

    #[test]
    fn in_flight_is_exclusive_until_dropped() {
        let flag = AtomicBool::new(false);
        let first = InFlight::acquire(&flag);
        assert!(first.is_some());
        assert!(InFlight::acquire(&flag).is_none());
        drop(first);
        assert!(InFlight::acquire(&flag).is_some());
    }
}
