//! Consumer side: merging change envelopes into an in-memory order list.
//!
//! [`OrderBook`] holds orders most-recent-first, keyed by identity. Every
//! operation is keyed and idempotent, so replaying a batch (after a restart
//! from an older watermark, or from two overlapping sources) converges to
//! the same state as applying it once.
//!
//! [`OrderFeed`] drives an [`OrderBook`] from the [`SyncEvent`] stream and
//! services refetch requests through a [`SnapshotSource`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{BranchId, OrderChange, OrderDocument, OrderId, UpdateEnvelope};
use crate::sync::{RefetchReason, SyncEvent, UpdateSource};
use crate::transport::SnapshotSource;

/// Identity-keyed order collection, most recent first.
///
/// Orders are stored oldest-first so that inserting the newest one is a push,
/// with `index` mapping each identity to its slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBook {
    orders: Vec<OrderDocument>,
    index: HashMap<OrderId, usize>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, id: &OrderId) -> Option<&OrderDocument> {
        self.index.get(id).map(|&slot| &self.orders[slot])
    }

    /// Iterates orders most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &OrderDocument> {
        self.orders.iter().rev()
    }

    /// Applies one envelope.
    ///
    /// - created: insert at the front, or merge if already present
    /// - updated / status changed: merge, or insert if missing
    /// - deleted: remove, no-op if absent
    pub fn apply(&mut self, envelope: &UpdateEnvelope) {
        match &envelope.change {
            OrderChange::Created(doc)
            | OrderChange::Updated(doc)
            | OrderChange::StatusChanged(doc) => {
                self.upsert(doc);
            }
            OrderChange::Deleted(id) => self.remove(id),
        }
    }

    /// Applies a batch in order.
    pub fn apply_batch(&mut self, updates: &[UpdateEnvelope]) {
        for envelope in updates {
            self.apply(envelope);
        }
    }

    /// Replaces the whole collection with a fresh snapshot, keeping the
    /// server's ordering and dropping duplicate identities.
    pub fn replace_all(&mut self, orders: Vec<OrderDocument>) {
        let mut fresh: Vec<OrderDocument> = Vec::with_capacity(orders.len());
        let mut index: HashMap<OrderId, usize> = HashMap::with_capacity(orders.len());
        for order in orders {
            match index.get(order.id()) {
                Some(&slot) => fresh[slot].merge(&order),
                None => {
                    index.insert(order.id().clone(), fresh.len());
                    fresh.push(order);
                }
            }
        }
        // Snapshots arrive most recent first.
        fresh.reverse();
        let last = fresh.len().saturating_sub(1);
        for slot in index.values_mut() {
            *slot = last - *slot;
        }
        self.orders = fresh;
        self.index = index;
    }

    fn upsert(&mut self, doc: &OrderDocument) {
        match self.index.get(doc.id()) {
            Some(&slot) => self.orders[slot].merge(doc),
            None => {
                self.index.insert(doc.id().clone(), self.orders.len());
                self.orders.push(doc.clone());
            }
        }
    }

    fn remove(&mut self, id: &OrderId) {
        let Some(removed) = self.index.remove(id) else {
            return;
        };
        self.orders.remove(removed);
        for slot in self.index.values_mut() {
            if *slot > removed {
                *slot -= 1;
            }
        }
    }
}

/// Applies sync events to an [`OrderBook`].
pub struct OrderFeed<S> {
    source: Arc<S>,
    branch: BranchId,
    book: OrderBook,
    last_error: Option<String>,
}

impl<S: SnapshotSource> OrderFeed<S> {
    pub fn new(source: Arc<S>, branch: BranchId) -> Self {
        Self {
            source,
            branch,
            book: OrderBook::new(),
            last_error: None,
        }
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Message of the most recent failure, for user-facing display.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Loads the full order list, replacing the book.
    pub async fn refetch(&mut self) {
        match self.source.list_orders(&self.branch).await {
            Ok(orders) => {
                info!(branch = %self.branch, count = orders.len(), "Reloaded orders");
                self.book.replace_all(orders);
                self.last_error = None;
            }
            Err(e) => {
                warn!(branch = %self.branch, "Order refetch failed: {e}");
                self.last_error = Some(e.to_string());
            }
        }
    }

    /// Handles a single event.
    pub async fn handle(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Updates { source, updates } => {
                debug!(?source, count = updates.len(), "Applying order updates");
                self.book.apply_batch(&updates);
            }
            SyncEvent::ChangesDetected(summary) => {
                debug!(count = summary.change_count, "Server reported changes");
            }
            SyncEvent::RefetchRequested(RefetchReason::Manual) => {
                self.refetch().await;
            }
            SyncEvent::RefetchRequested(RefetchReason::PolledUpdates) => {
                // The batch itself was already merged from the Updates event.
                debug!("Skipping refetch for polled batch");
            }
            SyncEvent::Error { source, error } => {
                if source != UpdateSource::LiveChannel {
                    self.last_error = Some(error.to_string());
                }
            }
        }
    }

    /// Consumes events until every sender is dropped, then returns the book.
    ///
    /// Refetch requests already queued behind one another collapse into a
    /// single reload.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncEvent>) -> OrderBook {
        while let Some(event) = rx.recv().await {
            let mut reason = match event {
                SyncEvent::RefetchRequested(reason) => reason,
                other => {
                    self.handle(other).await;
                    continue;
                }
            };

            let mut deferred = None;
            while let Ok(next) = rx.try_recv() {
                match next {
                    SyncEvent::RefetchRequested(RefetchReason::Manual) => {
                        reason = RefetchReason::Manual;
                    }
                    SyncEvent::RefetchRequested(_) => {}
                    other => {
                        deferred = Some(other);
                        break;
                    }
                }
            }
            self.handle(SyncEvent::RefetchRequested(reason)).await;
            if let Some(next) = deferred {
                self.handle(next).await;
            }
        }
        self.book
    }
}
