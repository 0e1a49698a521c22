//! Watermark timestamps and branch identifiers.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned timestamp marking "everything up to here has been seen".
///
/// The value is kept as the opaque string the server sent so it can be
/// echoed back verbatim in the next `since` parameter. Ordering compares the
/// RFC 3339 instants when both sides parse, and falls back to plain string
/// comparison otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(String);

impl Watermark {
    /// Wraps a raw timestamp string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Formats an instant the way the server does (millisecond precision, `Z`).
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Returns the raw timestamp string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the watermark as an RFC 3339 instant.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.0)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Moves the watermark forward to `next`.
    ///
    /// Returns `true` if the value changed. A `next` that sorts before the
    /// current value is ignored.
    pub fn advance(&mut self, next: &Watermark) -> bool {
        if *next > *self {
            self.0.clone_from(&next.0);
            true
        } else {
            false
        }
    }
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Watermark {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.instant(), other.instant()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Watermark {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Non-empty identifier of the branch whose orders are synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    /// Validates and wraps a branch id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidBranch`](crate::SyncError::InvalidBranch)
    /// if the id is empty or whitespace.
    pub fn new(raw: impl Into<String>) -> crate::Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(crate::SyncError::InvalidBranch);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
