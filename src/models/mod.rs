//! Wire models for the order sync endpoints.
//!
//! Contains the change notification envelope, the watermark type, and the
//! response payloads of the long-poll and change-check endpoints.

pub mod changes;
pub mod envelope;
pub mod poll;
pub mod response;
pub mod watermark;

pub use changes::ChangeSummary;
pub use envelope::{OrderChange, OrderDocument, OrderId, UpdateEnvelope, UpdateKind};
pub use poll::{PollData, PollOutcome};
pub use response::ApiResponse;
pub use watermark::{BranchId, Watermark};
