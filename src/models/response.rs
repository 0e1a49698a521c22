//! The `{success, data}` envelope every REST endpoint wraps its payload in.

use serde::Deserialize;

/// Generic REST response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwraps `data` from a successful response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Rejected`](crate::SyncError::Rejected) when
    /// `success` is false and
    /// [`SyncError::MalformedMessage`](crate::SyncError::MalformedMessage)
    /// when a successful response carries no `data`.
    pub fn into_data(self) -> crate::Result<T> {
        if !self.success {
            let reason = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "request unsuccessful".to_string());
            return Err(crate::SyncError::Rejected(reason));
        }
        self.data
            .ok_or_else(|| crate::SyncError::MalformedMessage("response has no data".into()))
    }
}
