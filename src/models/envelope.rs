//! Order change notifications.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::Watermark;

/// Kind of change carried by an [`UpdateEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    #[serde(alias = "order:created")]
    Created,
    #[serde(alias = "order:updated")]
    Updated,
    #[serde(alias = "order:deleted")]
    Deleted,
    #[serde(alias = "order:status_changed", alias = "order:statusChanged")]
    StatusChanged,
}

impl UpdateKind {
    /// Returns the wire name used in the `types` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Created => "created",
            UpdateKind::Updated => "updated",
            UpdateKind::Deleted => "deleted",
            UpdateKind::StatusChanged => "status_changed",
        }
    }
}

/// Identity of an order (the server's `_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An order as a loosely-typed field map plus its extracted identity.
///
/// The manufacturing fields themselves belong to the CRUD layer, so they are
/// kept as raw JSON and merged shallowly.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDocument {
    id: OrderId,
    fields: Map<String, Value>,
}

impl OrderDocument {
    /// Builds a document from a JSON object, extracting `_id` (or `id`).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedMessage`](crate::SyncError::MalformedMessage)
    /// if the value is not an object or carries no string/number identity.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        let Value::Object(fields) = value else {
            return Err(crate::SyncError::MalformedMessage(
                "order data is not an object".into(),
            ));
        };
        let id = identity_of(&fields).ok_or_else(|| {
            crate::SyncError::MalformedMessage("order data has no _id".into())
        })?;
        Ok(Self { id, fields })
    }

    pub fn id(&self) -> &OrderId {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a single field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Overwrites this document's top-level fields with `other`'s.
    pub fn merge(&mut self, other: &OrderDocument) {
        for (key, value) in &other.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl<'de> Deserialize<'de> for OrderDocument {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        OrderDocument::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl Serialize for OrderDocument {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

fn identity_of(fields: &Map<String, Value>) -> Option<OrderId> {
    let raw = fields.get("_id").or_else(|| fields.get("id"))?;
    match raw {
        Value::String(s) if !s.is_empty() => Some(OrderId::new(s.clone())),
        Value::Number(n) => Some(OrderId::new(n.to_string())),
        _ => None,
    }
}

/// Typed payload of a change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    Created(OrderDocument),
    Updated(OrderDocument),
    StatusChanged(OrderDocument),
    Deleted(OrderId),
}

impl OrderChange {
    pub fn kind(&self) -> UpdateKind {
        match self {
            OrderChange::Created(_) => UpdateKind::Created,
            OrderChange::Updated(_) => UpdateKind::Updated,
            OrderChange::StatusChanged(_) => UpdateKind::StatusChanged,
            OrderChange::Deleted(_) => UpdateKind::Deleted,
        }
    }

    /// Identity of the affected order.
    pub fn order_id(&self) -> &OrderId {
        match self {
            OrderChange::Created(doc)
            | OrderChange::Updated(doc)
            | OrderChange::StatusChanged(doc) => doc.id(),
            OrderChange::Deleted(id) => id,
        }
    }
}

/// A single change notification: what happened, to which order, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub struct UpdateEnvelope {
    pub change: OrderChange,
    /// Server time the change was recorded. Older servers omit it.
    pub timestamp: Option<Watermark>,
}

impl UpdateEnvelope {
    pub fn new(change: OrderChange, timestamp: Option<Watermark>) -> Self {
        Self { change, timestamp }
    }

    pub fn kind(&self) -> UpdateKind {
        self.change.kind()
    }

    pub fn order_id(&self) -> &OrderId {
        self.change.order_id()
    }
}

/// Decodes a batch of raw envelopes, skipping any this client cannot read.
///
/// An envelope with an unrecognized `type` or without an identity is logged
/// and dropped, so one bad entry never costs the rest of the batch.
pub fn decode_batch(values: Vec<Value>) -> Vec<UpdateEnvelope> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<UpdateEnvelope>(value) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!("Skipping undecodable update envelope: {e}");
                None
            }
        })
        .collect()
}

/// `deserialize_with` adapter for [`decode_batch`].
pub(crate) fn deserialize_batch<'de, D>(deserializer: D) -> Result<Vec<UpdateEnvelope>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(decode_batch(values))
}

/// Wire shape of an envelope: `{type, data, timestamp}`.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: UpdateKind,
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<Watermark>,
}

impl TryFrom<RawEnvelope> for UpdateEnvelope {
    type Error = crate::SyncError;

    fn try_from(raw: RawEnvelope) -> crate::Result<Self> {
        let change = match raw.kind {
            UpdateKind::Created => OrderChange::Created(OrderDocument::from_value(raw.data)?),
            UpdateKind::Updated => OrderChange::Updated(OrderDocument::from_value(raw.data)?),
            UpdateKind::StatusChanged => {
                OrderChange::StatusChanged(OrderDocument::from_value(raw.data)?)
            }
            UpdateKind::Deleted => {
                OrderChange::Deleted(OrderDocument::from_value(raw.data)?.id)
            }
        };
        Ok(Self {
            change,
            timestamp: raw.timestamp,
        })
    }
}

impl From<UpdateEnvelope> for RawEnvelope {
    fn from(envelope: UpdateEnvelope) -> Self {
        let kind = envelope.kind();
        let data = match envelope.change {
            OrderChange::Created(doc)
            | OrderChange::Updated(doc)
            | OrderChange::StatusChanged(doc) => doc.into_value(),
            OrderChange::Deleted(id) => serde_json::json!({ "_id": id }),
        };
        RawEnvelope {
            kind,
            data,
            timestamp: envelope.timestamp,
        }
    }
}
