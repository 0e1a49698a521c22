//! Change-check endpoint models.

use serde::{Deserialize, Serialize};

use super::Watermark;

/// `data` payload of `GET /v2/orders/changes`: a signal, no order payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub has_changes: bool,
    #[serde(default)]
    pub change_count: u64,
    /// Watermark the check was made against.
    pub since: Watermark,
    /// Server time of the check; becomes the next watermark.
    pub timestamp: Watermark,
}

impl ChangeSummary {
    /// A "nothing known" summary pinned at `watermark`.
    pub fn unchanged(watermark: Watermark) -> Self {
        Self {
            has_changes: false,
            change_count: 0,
            since: watermark.clone(),
            timestamp: watermark,
        }
    }
}
