//! Long-poll endpoint models.

use serde::Deserialize;

use super::envelope::deserialize_batch;
use super::{UpdateEnvelope, Watermark};

/// `data` payload of `GET /v2/orders/poll`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollData {
    /// Decoded envelopes; entries this client cannot read are skipped.
    #[serde(default, deserialize_with = "deserialize_batch")]
    pub updates: Vec<UpdateEnvelope>,
    /// Next watermark; never earlier than any envelope in `updates`.
    pub timestamp: Watermark,
    /// The server waited the full budget and found nothing.
    #[serde(default)]
    pub timed_out: bool,
    /// More buffered changes are waiting beyond this batch.
    #[serde(default)]
    pub has_more: bool,
}

/// Result of one [`LongPollClient::poll`](crate::sync::LongPollClient::poll).
///
/// Failures are reported out-of-band, so a failed poll yields the safe
/// default: no updates, `timed_out` set, watermark unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub updates: Vec<UpdateEnvelope>,
    /// Client watermark after the poll was accepted.
    pub watermark: Watermark,
    pub timed_out: bool,
    pub has_more: bool,
}

impl PollOutcome {
    /// The uniform result returned when a poll could not be completed.
    pub fn empty(watermark: Watermark) -> Self {
        Self {
            updates: Vec::new(),
            watermark,
            timed_out: true,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_flags_default_to_false() {
        let data: PollData = serde_json::from_value(json!({
            "updates": [],
            "timestamp": "2026-03-01T10:00:00.000Z"
        }))
        .unwrap();
        assert!(!data.timed_out);
        assert!(!data.has_more);
    }

    #[test]
    fn reads_camel_case_flags() {
        let data: PollData = serde_json::from_value(json!({
            "updates": [{"type": "updated", "data": {"_id": "A"}}],
            "timestamp": "2026-03-01T10:00:00.000Z",
            "timedOut": false,
            "hasMore": true
        }))
        .unwrap();
        assert_eq!(data.updates.len(), 1);
        assert!(data.has_more);
    }

    #[test]
    fn unreadable_envelopes_do_not_fail_the_batch() {
        let data: PollData = serde_json::from_value(json!({
            "updates": [
                {"type": "order:created", "data": {"_id": "A"}},
                {"type": "order:assigned", "data": {"_id": "B"}},
                {"type": "order:updated", "data": {"overallStatus": "done"}}
            ],
            "timestamp": "2026-03-01T10:00:05.000Z"
        }))
        .unwrap();
        assert_eq!(data.updates.len(), 1);
        assert_eq!(data.updates[0].order_id().as_str(), "A");
        assert_eq!(data.timestamp.as_str(), "2026-03-01T10:00:05.000Z");
    }
}
