// Async client for the compute API firewall surface.
//
// Base path: https://compute.googleapis.com/compute/beta/
// Auth: `Authorization: Bearer <token>`

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::retry::{RetryConfig, retry_transient};
use crate::transport::TransportConfig;
use crate::types::{self, Firewall, Network, Operation, OperationError, OperationErrors, Quota};
use crate::Error;

/// Default REST root for the compute API.
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/beta/";

/// Interval between `global/operations/{name}` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Error code stamped on an operation that outlived its wait budget.
pub const OPERATION_TIMEOUT_CODE: &str = "OPERATION_TIMEOUT";

/// Quota metric carrying the firewall rule count.
pub const FIREWALLS_QUOTA_METRIC: &str = "FIREWALLS";

// ── Trait ────────────────────────────────────────────────────────────

/// The slice of the compute API the enforcer consumes.
///
/// Implementations handle pagination, auth, and transient-error retry
/// internally; errors that reach the caller are final.
#[async_trait]
pub trait ComputeFirewallApi: Send + Sync {
    async fn list_networks(&self, project_id: &str) -> Result<Vec<Network>, Error>;

    /// Every firewall rule in the project, across all pages.
    async fn list_firewalls(&self, project_id: &str) -> Result<Vec<Firewall>, Error>;

    /// The `FIREWALLS` quota, or `None` when the project does not report one.
    async fn get_firewalls_quota(&self, project_id: &str) -> Result<Option<Quota>, Error>;

    async fn insert_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error>;

    /// Replace the rule named `rule.name` with `rule`.
    async fn update_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error>;

    async fn delete_firewall_rule(
        &self,
        project_id: &str,
        rule_name: &str,
    ) -> Result<Operation, Error>;

    async fn get_operation(
        &self,
        project_id: &str,
        operation_name: &str,
    ) -> Result<Operation, Error>;

    fn operation_poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Poll `operation` until it is `DONE` or `timeout` elapses.
    ///
    /// A timed-out operation is returned with an `OPERATION_TIMEOUT`
    /// error appended rather than as an `Err`.
    async fn wait_for_operation(
        &self,
        project_id: &str,
        mut operation: Operation,
        timeout: Duration,
    ) -> Result<Operation, Error> {
        let started = Instant::now();
        let interval = self.operation_poll_interval();

        while !operation.is_done() {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(
                    project_id,
                    operation = %operation.name,
                    timeout_secs = timeout.as_secs(),
                    "operation timed out"
                );
                let timeout_error = Error::OperationTimeout {
                    operation: operation.name.clone(),
                    timeout_secs: timeout.as_secs(),
                };
                operation
                    .error
                    .get_or_insert_with(OperationErrors::default)
                    .errors
                    .push(OperationError {
                        code: OPERATION_TIMEOUT_CODE.into(),
                        message: timeout_error.to_string(),
                        location: None,
                    });
                return Ok(operation);
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
            operation = self.get_operation(project_id, &operation.name).await?;
        }

        Ok(operation)
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// REST implementation of [`ComputeFirewallApi`].
///
/// One instance is shared (behind an `Arc`) by every project in a batch;
/// `reqwest::Client` pools connections internally.
pub struct ComputeClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
    poll_interval: Duration,
}

impl ComputeClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an access token and transport config.
    pub fn new(
        base_url: &str,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(token)?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            retry: RetryConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = &self.url(path)?;
        retry_transient(&self.retry, path, || async move {
            debug!("GET {url} params={params:?}");
            let resp = self.http.get(url.clone()).query(params).send().await?;
            handle_response(resp).await
        })
        .await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = &self.url(path)?;
        retry_transient(&self.retry, path, || async move {
            debug!("POST {url}");
            let resp = self.http.post(url.clone()).json(body).send().await?;
            handle_response(resp).await
        })
        .await
    }

    async fn put<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = &self.url(path)?;
        retry_transient(&self.retry, path, || async move {
            debug!("PUT {url}");
            let resp = self.http.put(url.clone()).json(body).send().await?;
            handle_response(resp).await
        })
        .await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = &self.url(path)?;
        retry_transient(&self.retry, path, || async move {
            debug!("DELETE {url}");
            let resp = self.http.delete(url.clone()).send().await?;
            handle_response(resp).await
        })
        .await
    }

    // ── Pagination helper ────────────────────────────────────────────

    /// Follow `nextPageToken` until the last page and collect every item.
    pub async fn paginate_all<T, F, Fut>(&self, fetch: F) -> Result<Vec<T>, Error>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<types::Page<T>, Error>>,
    {
        let mut all = Vec::new();
        let mut token = None;

        loop {
            let page = fetch(token).await?;
            all.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        Ok(all)
    }

    async fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page_token: Option<String>,
    ) -> Result<types::Page<T>, Error> {
        let params: Vec<(&str, String)> =
            page_token.map(|t| ("pageToken", t)).into_iter().collect();
        self.get(path, &params).await
    }
}

// ━━ Trait impl ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ComputeFirewallApi for ComputeClient {
    async fn list_networks(&self, project_id: &str) -> Result<Vec<Network>, Error> {
        let path = format!("projects/{project_id}/global/networks");
        self.paginate_all(|token| self.list_page(&path, token)).await
    }

    async fn list_firewalls(&self, project_id: &str) -> Result<Vec<Firewall>, Error> {
        let path = format!("projects/{project_id}/global/firewalls");
        self.paginate_all(|token| self.list_page(&path, token)).await
    }

    async fn get_firewalls_quota(&self, project_id: &str) -> Result<Option<Quota>, Error> {
        let project: types::Project = self
            .get(
                &format!("projects/{project_id}"),
                &[("fields", "quotas".to_owned())],
            )
            .await?;
        Ok(project
            .quotas
            .into_iter()
            .find(|q| q.metric == FIREWALLS_QUOTA_METRIC))
    }

    async fn insert_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error> {
        self.post(&format!("projects/{project_id}/global/firewalls"), rule)
            .await
    }

    async fn update_firewall_rule(
        &self,
        project_id: &str,
        rule: &Firewall,
    ) -> Result<Operation, Error> {
        let name = rule.name.as_deref().unwrap_or_default();
        self.put(
            &format!("projects/{project_id}/global/firewalls/{name}"),
            rule,
        )
        .await
    }

    async fn delete_firewall_rule(
        &self,
        project_id: &str,
        rule_name: &str,
    ) -> Result<Operation, Error> {
        self.delete(&format!(
            "projects/{project_id}/global/firewalls/{rule_name}"
        ))
        .await
    }

    async fn get_operation(
        &self,
        project_id: &str,
        operation_name: &str,
    ) -> Result<Operation, Error> {
        self.get(
            &format!("projects/{project_id}/global/operations/{operation_name}"),
            &[],
        )
        .await
    }

    fn operation_poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

// ── Response handling ────────────────────────────────────────────────

/// Ensure the base URL ends with `/` so relative joins append.
pub(crate) fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub(crate) async fn handle_response<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

pub(crate) async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();

    if let Ok(envelope) = serde_json::from_str::<types::ErrorEnvelope>(&raw) {
        Error::Http {
            status: status.as_u16(),
            message: envelope
                .error
                .message
                .unwrap_or_else(|| status.to_string()),
            reasons: envelope.error.errors,
        }
    } else {
        Error::Http {
            status: status.as_u16(),
            message: if raw.is_empty() {
                status.to_string()
            } else {
                raw
            },
            reasons: Vec::new(),
        }
    }
}
