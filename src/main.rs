use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use ordersync::SyncError;
use ordersync::auth::{HeaderProvider, StaticCredentials};
use ordersync::clock::SystemClock;
use ordersync::config::{AppConfig, fetch_config};
use ordersync::consumer::OrderFeed;
use ordersync::credentials::{self, CredentialKey, populate_env_from_keychain};
use ordersync::live::{LiveChannel, LiveStatus};
use ordersync::sync::{ChangeDetectorOptions, HybridController, HybridOptions, LongPollOptions};
use ordersync::tls::build_tls_config;
use ordersync::transport::HttpTransport;

fn hybrid_options(config: &AppConfig) -> HybridOptions {
    let defaults = HybridOptions::default();
    HybridOptions {
        prefer_websocket: config.sync.prefer_websocket,
        polling_enabled: config.sync.polling_enabled,
        long_poll: LongPollOptions {
            wait: config.sync.poll_timeout,
            ..defaults.long_poll.clone()
        },
        check: ChangeDetectorOptions {
            interval: config.sync.check_interval,
            ..ChangeDetectorOptions::default()
        },
        ..defaults
    }
}

/// Stores a credential read from stdin: `ordersync set-credential <api_key|auth_token>`.
fn set_credential(id: Option<String>) -> Result<(), SyncError> {
    let key = id.as_deref().and_then(CredentialKey::from_id).ok_or_else(|| {
        SyncError::Config("usage: ordersync set-credential <api_key|auth_token>".into())
    })?;

    let mut value = zeroize::Zeroizing::new(String::new());
    std::io::stdin()
        .read_line(&mut value)
        .map_err(|e| SyncError::Config(format!("failed to read credential from stdin: {e}")))?;

    credentials::save(key, value.trim())?;
    info!(key = key.keyring_id(), "Credential stored in keychain");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("set-credential") {
        return set_credential(args.next());
    }

    populate_env_from_keychain();
    let config = fetch_config()?;
    let branch = config.sync.branch_id.clone();

    let tls_config = build_tls_config(config.server.ca_cert.as_deref())?;
    let auth: Arc<dyn HeaderProvider> = Arc::new(StaticCredentials::new(
        config.server.auth_token.clone(),
        config.server.api_key.clone(),
    ));
    let transport = Arc::new(HttpTransport::new(
        config.server.api_url.clone(),
        tls_config.clone(),
        Arc::clone(&auth),
    )?);

    let (events, rx) = mpsc::unbounded_channel();
    let controller = HybridController::new(
        Arc::clone(&transport),
        branch.clone(),
        hybrid_options(&config),
        Arc::new(SystemClock),
        events.clone(),
    );

    let (live, status) = match &config.server.websocket_url {
        Some(url) => {
            let channel = LiveChannel::new(
                url.clone(),
                branch.clone(),
                Arc::new(tls_config),
                auth,
                events.clone(),
            )
            .gated_by(controller.subscribe_mode());
            let status = channel.status();
            (Some(channel.start()), status)
        }
        None => {
            info!("No live channel configured, relying on polling");
            let (_tx, status) = watch::channel(LiveStatus::Disconnected);
            (None, status)
        }
    };

    let supervisor = controller.start(status)?;
    drop(events);

    let feed = OrderFeed::new(Arc::clone(&transport), branch.clone());
    let consumer = tokio::spawn(feed.run(rx));
    controller.force_refresh();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| SyncError::Config(format!("failed to listen for ctrl-c: {e}")))?;
    info!("Shutting down");

    supervisor.stop().await;
    if let Some(live) = live {
        live.stop().await;
    }
    drop(controller);

    match consumer.await {
        Ok(book) => info!(branch = %branch, orders = book.len(), "Order sync stopped"),
        Err(e) => tracing::error!("order consumer panicked: {e}"),
    }

    Ok(())
}
