//! Application configuration loaded from environment variables.
//!
//! - `ORDERSYNC_BRANCH_ID` - **required**, branch whose orders are synced
//! - `ORDERSYNC_API_URL` - REST base URL (default `http://localhost:5000/api`)
//! - `ORDERSYNC_WEBSOCKET_URL` - live channel URL; unset disables it
//! - `ORDERSYNC_API_KEY`, `ORDERSYNC_AUTH_TOKEN` - request credentials
//! - `ORDERSYNC_PREFER_WEBSOCKET`, `ORDERSYNC_POLLING_ENABLED` - mode inputs
//! - `ORDERSYNC_POLL_TIMEOUT_MS` - long-poll wait budget
//! - `ORDERSYNC_CHECK_INTERVAL_SECS` - change-detection interval
//! - `ORDERSYNC_CA_CERT` - extra PEM CA bundle

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::BranchId;

/// Default REST base URL of a locally installed order server.
const DEFAULT_API_URL: &str = "http://localhost:5000/api";

const DEFAULT_POLL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sync: SyncSettings,
}

/// Where the order server lives and how to authenticate against it.
#[derive(Debug)]
pub struct ServerConfig {
    pub api_url: String,
    pub websocket_url: Option<String>,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub ca_cert: Option<PathBuf>,
}

/// Tunables for the sync engine.
#[derive(Debug)]
pub struct SyncSettings {
    pub branch_id: BranchId,
    pub prefer_websocket: bool,
    pub polling_enabled: bool,
    pub poll_timeout: Duration,
    pub check_interval: Duration,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`SyncError::Config`](crate::SyncError::Config) if the branch id
/// is missing or a numeric/boolean variable does not parse, and
/// [`SyncError::InvalidBranch`](crate::SyncError::InvalidBranch) if the
/// branch id is blank.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let api_url = non_empty_var("ORDERSYNC_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let branch = non_empty_var("ORDERSYNC_BRANCH_ID").ok_or_else(|| {
        crate::SyncError::Config("ORDERSYNC_BRANCH_ID must be set".to_string())
    })?;
    let branch_id = BranchId::new(branch)?;

    let poll_timeout_ms =
        parsed_var("ORDERSYNC_POLL_TIMEOUT_MS")?.unwrap_or(DEFAULT_POLL_TIMEOUT_MS);
    let check_interval_secs =
        parsed_var("ORDERSYNC_CHECK_INTERVAL_SECS")?.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS);
    if check_interval_secs == 0 {
        return Err(crate::SyncError::Config(
            "ORDERSYNC_CHECK_INTERVAL_SECS must be greater than zero".to_string(),
        ));
    }

    Ok(AppConfig {
        server: ServerConfig {
            api_url,
            websocket_url: non_empty_var("ORDERSYNC_WEBSOCKET_URL"),
            api_key: non_empty_var("ORDERSYNC_API_KEY"),
            auth_token: non_empty_var("ORDERSYNC_AUTH_TOKEN"),
            ca_cert: non_empty_var("ORDERSYNC_CA_CERT").map(PathBuf::from),
        },
        sync: SyncSettings {
            branch_id,
            prefer_websocket: parsed_var("ORDERSYNC_PREFER_WEBSOCKET")?.unwrap_or(true),
            polling_enabled: parsed_var("ORDERSYNC_POLLING_ENABLED")?.unwrap_or(true),
            poll_timeout: Duration::from_millis(poll_timeout_ms),
            check_interval: Duration::from_secs(check_interval_secs),
        },
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Parses an optional environment variable.
fn parsed_var<T>(name: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| crate::SyncError::Config(format!("{name}={raw:?} is invalid: {e}")))
        })
        .transpose()
}
