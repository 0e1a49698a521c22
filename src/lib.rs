//! Order update synchronization for manufacturing desktops.
//!
//! Keeps a client's view of a branch's orders current through three
//! cooperating mechanisms: a live WebSocket push channel, HTTP long-polling,
//! and periodic change detection, arbitrated by a hybrid controller. A
//! consumer adapter merges the resulting change envelopes into an in-memory
//! order list.

pub mod auth;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod credentials;
pub mod error;
pub mod live;
pub mod models;
pub mod sync;
pub mod tls;
pub mod transport;

pub use error::{Result, SyncError};
