//! Crate-level error types.
//!
//! [`SyncError`] unifies every error source (configuration, HTTP, WebSocket,
//! JSON, server rejections) behind a single enum so callers can match on the
//! variant they care about while still using the `?` operator.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error type returned by all fallible APIs.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration was missing or could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A branch id was empty.
    #[error("branch id must not be empty")]
    InvalidBranch,

    /// An HTTP request failed at the transport level (connect, timeout, body).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered `success: false`.
    #[error("request rejected by server: {0}")]
    Rejected(String),

    /// A response or frame did not have the expected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(String),

    /// The OS keychain could not be read or written.
    #[error("keychain error: {0}")]
    Keychain(String),

    /// A request was issued while another one from the same client was
    /// still outstanding.
    #[error("a request is already in flight for this client")]
    InFlight,
}

impl SyncError {
    /// Returns `true` for errors the polling loops recover from by retrying.
    ///
    /// Everything except configuration problems is considered transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::Config(_) | Self::InvalidBranch | Self::Tls(_) | Self::Keychain(_)
        )
    }
}
