//! Incoming live channel frame parsing.

use tracing::{debug, warn};

use crate::models::UpdateEnvelope;
use crate::models::envelope::decode_batch;

/// A decoded live channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFrame {
    /// One or more change envelopes, in server order.
    Updates(Vec<UpdateEnvelope>),
    /// A protocol message (subscribe ack, pong, ...) identified by its
    /// `method` or `event` field.
    Control(String),
    /// Anything else; ignored.
    Unknown,
}

/// Parses a text frame.
///
/// Accepted update shapes are a single envelope, a JSON array of envelopes,
/// or an object with an `updates` array. Within a batch, envelopes that fail
/// to decode are logged and skipped; a lone envelope or a batch that is not
/// an array and fails to decode becomes [`LiveFrame::Unknown`].
pub fn parse_frame(text: &str) -> LiveFrame {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring non-JSON live frame: {e}");
            return LiveFrame::Unknown;
        }
    };

    if value.is_array() {
        return decode_updates(value);
    }

    if let Some(updates) = value.get("updates") {
        return decode_updates(updates.clone());
    }

    if value.get("type").is_some() && value.get("data").is_some() {
        return match serde_json::from_value::<UpdateEnvelope>(value) {
            Ok(envelope) => LiveFrame::Updates(vec![envelope]),
            Err(e) => {
                warn!("Ignoring malformed update frame: {e}");
                LiveFrame::Unknown
            }
        };
    }

    let control = value
        .get("method")
        .or_else(|| value.get("event"))
        .and_then(|m| m.as_str());
    match control {
        Some(name) => {
            debug!(name, "Received control frame");
            LiveFrame::Control(name.to_string())
        }
        None => LiveFrame::Unknown,
    }
}

fn decode_updates(value: serde_json::Value) -> LiveFrame {
    match value {
        serde_json::Value::Array(values) => LiveFrame::Updates(decode_batch(values)),
        other => {
            warn!("Ignoring update batch that is not an array: {other}");
            LiveFrame::Unknown
        }
    }
}
