//! Request/response seam between the sync clients and the order server.
//!
//! The clients only depend on [`OrderTransport`]; [`HttpTransport`] is the
//! production implementation over `reqwest`, and tests substitute a scripted
//! mock.

mod http;

use std::future::Future;
use std::time::Duration;

pub use http::HttpTransport;

use crate::Result;
use crate::models::{BranchId, ChangeSummary, OrderDocument, PollData, UpdateKind, Watermark};

/// Upper bound on how long the server may hold a long-poll open.
pub const MAX_LONG_POLL_WAIT: Duration = Duration::from_secs(60);

/// Default request budget of a change check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of one long-poll request.
#[derive(Debug, Clone, PartialEq)]
pub struct PollQuery {
    pub branch: BranchId,
    pub since: Watermark,
    /// Server-side wait budget, already clamped to [`MAX_LONG_POLL_WAIT`].
    pub wait: Duration,
    /// Allow-list of change kinds; `None` means all.
    pub types: Option<Vec<UpdateKind>>,
}

impl PollQuery {
    pub fn new(
        branch: BranchId,
        since: Watermark,
        wait: Duration,
        types: Option<Vec<UpdateKind>>,
    ) -> Self {
        Self {
            branch,
            since,
            wait: clamp_wait(wait),
            types,
        }
    }

    /// Comma-joined `types` parameter, or `None` when unfiltered.
    pub fn types_param(&self) -> Option<String> {
        self.types.as_ref().filter(|t| !t.is_empty()).map(|types| {
            types
                .iter()
                .map(UpdateKind::as_str)
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

/// Parameters of one change check.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeQuery {
    pub branch: BranchId,
    pub since: Watermark,
    /// Client-side budget for the whole request.
    pub timeout: Duration,
}

/// Clamps a requested long-poll wait to [`MAX_LONG_POLL_WAIT`].
pub fn clamp_wait(wait: Duration) -> Duration {
    wait.min(MAX_LONG_POLL_WAIT)
}

/// The two order sync endpoints.
///
/// Implementations must map every failure (network, non-2xx, `success:
/// false`, undecodable body) to an `Err`; the clients decide what to do
/// with it.
pub trait OrderTransport: Send + Sync {
    /// Blocks until changes after `query.since` exist or the wait elapses.
    fn poll(&self, query: &PollQuery) -> impl Future<Output = Result<PollData>> + Send;

    /// Asks whether anything changed after `query.since`, without payloads.
    fn check_changes(
        &self,
        query: &ChangeQuery,
    ) -> impl Future<Output = Result<ChangeSummary>> + Send;
}

/// Full order listing offered by the CRUD layer, used for refetches.
pub trait SnapshotSource: Send + Sync {
    fn list_orders(
        &self,
        branch: &BranchId,
    ) -> impl Future<Output = Result<Vec<OrderDocument>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch() -> BranchId {
        BranchId::new("plant-1").unwrap()
    }

    #[test]
    fn wait_is_clamped_to_maximum() {
        let query = PollQuery::new(branch(), "t0".into(), Duration::from_secs(600), None);
        assert_eq!(query.wait, MAX_LONG_POLL_WAIT);

        let query = PollQuery::new(branch(), "t0".into(), Duration::from_secs(20), None);
        assert_eq!(query.wait, Duration::from_secs(20));
    }

    #[test]
    fn types_are_comma_joined() {
        let query = PollQuery::new(
            branch(),
            "t0".into(),
            Duration::from_secs(30),
            Some(vec![UpdateKind::Created, UpdateKind::StatusChanged]),
        );
        assert_eq!(query.types_param().as_deref(), Some("created,status_changed"));
    }

    #[test]
    fn empty_type_filter_means_unfiltered() {
        let query = PollQuery::new(branch(), "t0".into(), Duration::from_secs(30), Some(vec![]));
        assert!(query.types_param().is_none());
    }
}
