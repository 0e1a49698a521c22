//! Live channel connection lifecycle.
//!
//! [`LiveChannel`] connects, subscribes to its branch, forwards pushed
//! envelopes, and reconnects with exponential backoff. Its status is
//! published on a `watch` channel that the hybrid controller follows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{LiveFrame, LiveStatus, WsReader, connect, next_text, parse_frame, subscribe};
use crate::auth::HeaderProvider;
use crate::models::BranchId;
use crate::sync::{Activity, ConnectionMode, EventSink, SyncEvent, SyncHandle, UpdateSource};

/// Initial backoff duration between reconnection attempts.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum backoff duration between reconnection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Why the reader loop exited.
enum DisconnectReason {
    /// The connection was lost or errored.
    ConnectionError,
    /// The handle was cancelled or the consumer went away.
    Shutdown,
}

/// Manages the live channel connection, including reconnection with
/// exponential backoff.
pub struct LiveChannel {
    url: String,
    branch: BranchId,
    tls_config: Arc<rustls::ClientConfig>,
    auth: Arc<dyn HeaderProvider>,
    status: watch::Sender<LiveStatus>,
    mode: Option<watch::Receiver<ConnectionMode>>,
    events: EventSink,
}

impl LiveChannel {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        branch: BranchId,
        tls_config: Arc<rustls::ClientConfig>,
        auth: Arc<dyn HeaderProvider>,
        events: EventSink,
    ) -> Self {
        Self {
            url: url.into(),
            branch,
            tls_config,
            auth,
            status: watch::Sender::new(LiveStatus::Disconnected),
            mode: None,
            events,
        }
    }

    /// Forwards pushed updates only while `mode` is
    /// [`ConnectionMode::Websocket`], so a polling fallback and the live
    /// channel never both feed the consumer.
    #[must_use]
    pub fn gated_by(mut self, mode: watch::Receiver<ConnectionMode>) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Observes the connection status.
    pub fn status(&self) -> watch::Receiver<LiveStatus> {
        self.status.subscribe()
    }

    /// Starts the connection loop on the current runtime.
    pub fn start(self) -> SyncHandle {
        let activity = Activity::new();
        let loop_activity = Arc::clone(&activity);
        let task = tokio::spawn(async move { self.run(&loop_activity).await });
        SyncHandle::new(activity, task)
    }

    fn set_status(&self, status: LiveStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn forwarding(&self) -> bool {
        self.mode
            .as_ref()
            .is_none_or(|mode| *mode.borrow() == ConnectionMode::Websocket)
    }

    async fn run(self, activity: &Activity) {
        let mut backoff = INITIAL_BACKOFF;

        while activity.is_active() {
            self.set_status(LiveStatus::Connecting);

            info!(url = %self.url, "Connecting to live channel");
            let headers = self.auth.headers();
            let connected = tokio::select! {
                result = connect(&self.url, &headers, Arc::clone(&self.tls_config)) => Some(result),
                () = activity.cancelled() => None,
            };
            drop(headers);

            let (mut write, read) = match connected {
                None => break,
                Some(Ok(pair)) => pair,
                Some(Err(e)) => {
                    error!("Live channel connection failed: {e}");
                    self.set_status(LiveStatus::Disconnected);
                    info!(backoff_secs = backoff.as_secs(), "Backing off before retry");
                    if !activity.pause(backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            if let Err(e) = subscribe(&mut write, &self.branch).await {
                warn!("Subscribe failed: {e}");
                self.set_status(LiveStatus::Disconnected);
                if !activity.pause(backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            self.set_status(LiveStatus::Connected);
            info!(branch = %self.branch, "Live channel connected and subscribed");
            backoff = INITIAL_BACKOFF;

            // The writer stays alive for the connection's lifetime so the
            // server does not see a half-closed socket.
            let reason = self.read_loop(read, activity).await;
            drop(write);
            self.set_status(LiveStatus::Disconnected);

            match reason {
                DisconnectReason::ConnectionError => {
                    info!(
                        backoff_secs = backoff.as_secs(),
                        "Connection lost, backing off"
                    );
                    if !activity.pause(backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                DisconnectReason::Shutdown => break,
            }
        }

        self.set_status(LiveStatus::Disconnected);
        info!("Live channel shutting down");
    }

    async fn read_loop(&self, mut read: WsReader, activity: &Activity) -> DisconnectReason {
        loop {
            let text = tokio::select! {
                next = next_text(&mut read) => next,
                () = activity.cancelled() => return DisconnectReason::Shutdown,
            };

            let text = match text {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!("WebSocket error: {e}");
                    return DisconnectReason::ConnectionError;
                }
                None => {
                    warn!("WebSocket stream ended");
                    return DisconnectReason::ConnectionError;
                }
            };

            if let LiveFrame::Updates(updates) = parse_frame(&text) {
                if updates.is_empty() || !self.forwarding() {
                    continue;
                }
                let event = SyncEvent::Updates {
                    source: UpdateSource::LiveChannel,
                    updates,
                };
                if self.events.send(event).is_err() {
                    return DisconnectReason::Shutdown;
                }
            }
        }
    }
}
