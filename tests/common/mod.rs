//! Shared test utilities: a scripted transport and a settable clock.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use ordersync::Result;
use ordersync::clock::Clock;
use ordersync::models::{
    BranchId, ChangeSummary, OrderDocument, PollData, UpdateEnvelope, Watermark,
};
use ordersync::transport::{ChangeQuery, OrderTransport, PollQuery, SnapshotSource};

pub const T0: &str = "2026-03-01T10:00:00.000Z";
pub const T1: &str = "2026-03-01T10:00:01.000Z";
pub const T2: &str = "2026-03-01T10:00:02.000Z";
pub const T3: &str = "2026-03-01T10:00:03.000Z";
pub const T5: &str = "2026-03-01T10:00:05.000Z";

pub fn branch() -> BranchId {
    BranchId::new("plant-1").expect("valid branch")
}

pub fn wm(raw: &str) -> Watermark {
    Watermark::new(raw)
}

/// Builds an envelope from a wire type name and an order id.
pub fn envelope(kind: &str, id: &str) -> UpdateEnvelope {
    serde_json::from_value(json!({
        "type": kind,
        "data": {"_id": id, "overallStatus": "pending"},
        "timestamp": T1,
    }))
    .expect("valid envelope")
}

pub fn order(id: &str) -> OrderDocument {
    OrderDocument::from_value(json!({"_id": id, "overallStatus": "pending"})).expect("valid order")
}

pub fn poll_data(updates: Vec<UpdateEnvelope>, timestamp: &str) -> PollData {
    PollData {
        timed_out: updates.is_empty(),
        updates,
        timestamp: wm(timestamp),
        has_more: false,
    }
}

pub fn summary(change_count: u64, since: &str, timestamp: &str) -> ChangeSummary {
    ChangeSummary {
        has_changes: change_count > 0,
        change_count,
        since: wm(since),
        timestamp: wm(timestamp),
    }
}

/// A [`Clock`] whose time is set by the test.
pub struct TestClock {
    now: Mutex<Watermark>,
}

impl TestClock {
    pub fn new(raw: &str) -> Self {
        Self {
            now: Mutex::new(wm(raw)),
        }
    }

    pub fn set(&self, raw: &str) {
        *self.now.lock().unwrap() = wm(raw);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Watermark {
        self.now.lock().unwrap().clone()
    }
}

/// One scripted reply, optionally delayed.
struct Step<T> {
    delay: Duration,
    result: Result<T>,
}

/// Concurrency tracker released on drop.
struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport replaying queued replies and recording every request.
///
/// Once a script runs dry, polls behave like a quiet server (hold for the
/// requested wait, then return nothing at the same watermark) and change
/// checks answer "unchanged" immediately.
#[derive(Default)]
pub struct ScriptedTransport {
    polls: Mutex<VecDeque<Step<PollData>>>,
    checks: Mutex<VecDeque<Step<ChangeSummary>>>,
    snapshots: Mutex<VecDeque<Result<Vec<OrderDocument>>>>,
    poll_queries: Mutex<Vec<PollQuery>>,
    change_queries: Mutex<Vec<ChangeQuery>>,
    list_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_poll(&self, result: Result<PollData>) {
        self.push_poll_after(Duration::ZERO, result);
    }

    pub fn push_poll_after(&self, delay: Duration, result: Result<PollData>) {
        self.polls.lock().unwrap().push_back(Step { delay, result });
    }

    pub fn push_check(&self, result: Result<ChangeSummary>) {
        self.checks.lock().unwrap().push_back(Step {
            delay: Duration::ZERO,
            result,
        });
    }

    pub fn push_snapshot(&self, result: Result<Vec<OrderDocument>>) {
        self.snapshots.lock().unwrap().push_back(result);
    }

    pub fn poll_queries(&self) -> Vec<PollQuery> {
        self.poll_queries.lock().unwrap().clone()
    }

    pub fn change_queries(&self) -> Vec<ChangeQuery> {
        self.change_queries.lock().unwrap().clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_queries.lock().unwrap().len()
    }

    pub fn check_calls(&self) -> usize {
        self.change_queries.lock().unwrap().len()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Highest number of poll/check requests ever outstanding at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Active<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Active(&self.active)
    }
}

impl OrderTransport for ScriptedTransport {
    async fn poll(&self, query: &PollQuery) -> Result<PollData> {
        let _active = self.enter();
        self.poll_queries.lock().unwrap().push(query.clone());
        let step = self.polls.lock().unwrap().pop_front();

        match step {
            Some(step) => {
                tokio::time::sleep(step.delay).await;
                step.result
            }
            None => {
                tokio::time::sleep(query.wait).await;
                Ok(PollData {
                    updates: Vec::new(),
                    timestamp: query.since.clone(),
                    timed_out: true,
                    has_more: false,
                })
            }
        }
    }

    async fn check_changes(&self, query: &ChangeQuery) -> Result<ChangeSummary> {
        let _active = self.enter();
        self.change_queries.lock().unwrap().push(query.clone());
        let step = self.checks.lock().unwrap().pop_front();

        match step {
            Some(step) => {
                tokio::time::sleep(step.delay).await;
                step.result
            }
            None => Ok(ChangeSummary::unchanged(query.since.clone())),
        }
    }
}

impl SnapshotSource for ScriptedTransport {
    async fn list_orders(&self, _branch: &BranchId) -> Result<Vec<OrderDocument>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.snapshots.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Waits (in virtual time) until `condition` holds, panicking after `limit`.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
