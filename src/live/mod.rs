//! Live push channel over WebSocket.
//!
//! The order server pushes change envelopes to subscribed desktops as they
//! happen. This module is organized by concern:
//! - [`connection`] - connect/reconnect lifecycle and status reporting
//! - [`handler`] - incoming frame parsing

pub mod connection;
mod handler;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use tungstenite::Message;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::AUTHORIZATION;

use crate::Result;
use crate::auth::{API_KEY_HEADER, AuthHeaders};
use crate::models::BranchId;

pub use connection::LiveChannel;
pub use handler::{LiveFrame, parse_frame};

/// Write half of a live channel connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a live channel connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state of the live channel, as seen by the hybrid controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl LiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveStatus::Disconnected => "disconnected",
            LiveStatus::Connecting => "connecting",
            LiveStatus::Connected => "connected",
        }
    }
}

/// A `subscribe` request scoping pushed updates to one branch.
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams {
    #[serde(rename = "branchId")]
    pub branch_id: String,
}

impl SubscribeRequest {
    pub fn new(branch: &BranchId) -> Self {
        Self {
            method: "subscribe",
            params: SubscribeParams {
                branch_id: branch.as_str().to_string(),
            },
        }
    }
}

/// Establishes a WebSocket connection to `url`, attaching auth headers.
///
/// # Errors
///
/// Returns a [`SyncError`](crate::SyncError) if the URL or headers are
/// invalid or the connection or TLS handshake fails.
pub async fn connect(
    url: &str,
    headers: &AuthHeaders,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<(WsWriter, WsReader)> {
    let mut request = url.into_client_request()?;

    if let Some(authorization) = headers.authorization() {
        let value = HeaderValue::from_str(&authorization)
            .map_err(|e| crate::SyncError::Config(format!("invalid auth token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    if let Some(api_key) = headers.api_key.as_deref() {
        let value = HeaderValue::from_str(api_key)
            .map_err(|e| crate::SyncError::Config(format!("invalid API key: {e}")))?;
        request.headers_mut().insert(API_KEY_HEADER, value);
    }

    let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        None,
        false,
        Some(Connector::Rustls(tls_config)),
    )
    .await?;
    info!("WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// Subscribes the connection to one branch's order updates.
///
/// # Errors
///
/// Returns a [`SyncError`](crate::SyncError) if sending the message fails.
pub async fn subscribe(write: &mut WsWriter, branch: &BranchId) -> Result<()> {
    let json = serde_json::to_string(&SubscribeRequest::new(branch))?;
    debug!("Sending subscribe request: {}", json);
    write.send(Message::Text(json.into())).await?;
    info!(branch = %branch, "Subscribed to order updates");

    Ok(())
}

/// Waits for the next text frame, skipping control frames.
///
/// Returns `None` when the stream ends.
pub async fn next_text(read: &mut WsReader) -> Option<Result<String>> {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e.into())),
        }
    }
    None
}
