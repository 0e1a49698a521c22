//! `reqwest`-backed implementation of the order sync endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ChangeQuery, OrderTransport, PollQuery, SnapshotSource};
use crate::Result;
use crate::auth::{API_KEY_HEADER, HeaderProvider};
use crate::models::{ApiResponse, BranchId, ChangeSummary, OrderDocument, PollData};

const POLL_PATH: &str = "/v2/orders/poll";
const CHANGES_PATH: &str = "/v2/orders/changes";
const ORDERS_PATH: &str = "/v2/orders";

/// Extra client-side time on top of the server wait, so a server that
/// answers "nothing happened" at the deadline is not mistaken for a
/// transport timeout.
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);

/// Budget for a full order listing.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the order server's REST API.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn HeaderProvider>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (e.g. `https://host/api`).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](crate::SyncError::Config) if the base
    /// URL does not parse and [`SyncError::Tls`](crate::SyncError::Tls) if
    /// the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        tls_config: rustls::ClientConfig,
        auth: Arc<dyn HeaderProvider>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| crate::SyncError::Config(format!("invalid API URL {base_url:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls_config)
            .build()
            .map_err(|e| crate::SyncError::Tls(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| crate::SyncError::Config(format!("invalid URL {raw:?}: {e}")))
    }

    /// Builds the long-poll URL with its query string.
    pub fn poll_url(&self, query: &PollQuery) -> Result<Url> {
        let mut url = self.endpoint(POLL_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("branchId", query.branch.as_str())
                .append_pair("since", query.since.as_str())
                .append_pair("timeout", &query.wait.as_millis().to_string());
            if let Some(types) = query.types_param() {
                pairs.append_pair("types", &types);
            }
        }
        Ok(url)
    }

    /// Builds the change-check URL with its query string.
    pub fn changes_url(&self, query: &ChangeQuery) -> Result<Url> {
        let mut url = self.endpoint(CHANGES_PATH)?;
        url.query_pairs_mut()
            .append_pair("branchId", query.branch.as_str())
            .append_pair("since", query.since.as_str());
        Ok(url)
    }

    fn orders_url(&self, branch: &BranchId) -> Result<Url> {
        let mut url = self.endpoint(ORDERS_PATH)?;
        url.query_pairs_mut().append_pair("branchId", branch.as_str());
        Ok(url)
    }

    /// Issues an authenticated GET and unwraps the `{success, data}` body.
    async fn get_data<T: DeserializeOwned>(&self, url: Url, timeout: Duration) -> Result<T> {
        let headers = self.auth.headers();
        let mut request = self.client.get(url.clone()).timeout(timeout);
        if let Some(authorization) = headers.authorization() {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if let Some(api_key) = headers.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, api_key.as_str());
        }

        debug!(url = %url.path(), timeout_ms = timeout.as_millis() as u64, "Sending request");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(crate::SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ApiResponse<T> = response.json().await?;
        body.into_data()
    }
}

impl OrderTransport for HttpTransport {
    async fn poll(&self, query: &PollQuery) -> Result<PollData> {
        let url = self.poll_url(query)?;
        self.get_data(url, query.wait + LONG_POLL_GRACE).await
    }

    async fn check_changes(&self, query: &ChangeQuery) -> Result<ChangeSummary> {
        let url = self.changes_url(query)?;
        self.get_data(url, query.timeout).await
    }
}

impl SnapshotSource for HttpTransport {
    async fn list_orders(&self, branch: &BranchId) -> Result<Vec<OrderDocument>> {
        let url = self.orders_url(branch)?;
        self.get_data(url, SNAPSHOT_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::models::UpdateKind;

    fn transport(base: &str) -> HttpTransport {
        let tls = crate::tls::build_tls_config(None).unwrap();
        HttpTransport::new(base, tls, Arc::new(StaticCredentials::default())).unwrap()
    }

    fn branch() -> BranchId {
        BranchId::new("plant 1").unwrap()
    }

    #[test]
    fn poll_url_carries_all_parameters() {
        let transport = transport("http://localhost:5000/api/");
        let query = PollQuery::new(
            branch(),
            "2026-03-01T10:00:00.000Z".into(),
            Duration::from_secs(90),
            Some(vec![UpdateKind::Created, UpdateKind::Deleted]),
        );

        let url = transport.poll_url(&query).unwrap();
        assert_eq!(url.path(), "/api/v2/orders/poll");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("branchId".to_string(), "plant 1".to_string()),
                ("since".to_string(), "2026-03-01T10:00:00.000Z".to_string()),
                ("timeout".to_string(), "60000".to_string()),
                ("types".to_string(), "created,deleted".to_string()),
            ]
        );
    }

    #[test]
    fn changes_url_has_no_timeout_parameter() {
        let transport = transport("https://orders.example.com/api");
        let query = ChangeQuery {
            branch: branch(),
            since: "t0".into(),
            timeout: Duration::from_secs(10),
        };

        let url = transport.changes_url(&query).unwrap();
        assert_eq!(url.path(), "/api/v2/orders/changes");
        assert!(url.query_pairs().all(|(k, _)| k != "timeout"));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let tls = crate::tls::build_tls_config(None).unwrap();
        let result = HttpTransport::new("not a url", tls, Arc::new(StaticCredentials::default()));
        assert!(matches!(result, Err(crate::SyncError::Config(_))));
    }
}
