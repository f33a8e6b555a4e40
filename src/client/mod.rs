use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::utils::now_millis;
use crate::utils::retry::with_retry;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Timeout, connection failure or 5xx. Triggers endpoint failover.
    #[error("transport error: {0}")]
    Transport(String),

    /// Well-formed error payload, 4xx, or an unusable response body.
    /// Never triggers failover.
    #[error("query error: {0}")]
    Query(String),
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

enum Route<'a> {
    Primary(&'a str),
    Secondary(&'a str),
}

/// GraphQL-over-HTTP client for the indexing service.
///
/// Every call carries a fixed request timeout. Transport failures on the
/// primary endpoint are retried with backoff; if the retries are exhausted
/// the client fails over to the secondary endpoint for a cool-down window.
/// During the window all calls route to the secondary regardless of its
/// own health; expiry is evaluated lazily on the next call.
pub struct IndexerClient {
    http: reqwest::Client,
    primary_url: String,
    secondary_url: Option<String>,
    /// Epoch millis until which calls route to the secondary. 0 = none.
    failover_until: AtomicU64,
    failover_cooldown: u64,
    retry_delay: u64,
    max_retries: u32,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_FAILOVER_COOLDOWN: Duration = Duration::from_secs(600);

impl IndexerClient {
    pub fn new(primary_url: String, secondary_url: Option<String>) -> anyhow::Result<Self> {
        Self::with_timeout(primary_url, secondary_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        primary_url: String,
        secondary_url: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        info!(
            "Creating indexer client for {} (fallback: {})",
            primary_url,
            secondary_url.as_deref().unwrap_or("none")
        );
        Ok(Self {
            http,
            primary_url,
            secondary_url,
            failover_until: AtomicU64::new(0),
            failover_cooldown: DEFAULT_FAILOVER_COOLDOWN.as_millis() as u64,
            retry_delay: 1000,
            max_retries: 3,
        })
    }

    /// Configure retry settings for the primary-endpoint path
    pub fn with_retry_settings(mut self, retry_delay: u64, max_retries: u32) -> Self {
        self.retry_delay = retry_delay;
        self.max_retries = max_retries;
        self
    }

    pub fn with_failover_cooldown(mut self, cooldown: Duration) -> Self {
        self.failover_cooldown = cooldown.as_millis() as u64;
        self
    }

    fn route_at(&self, now: u64) -> Route<'_> {
        if let Some(url) = self.secondary_url.as_deref() {
            if now < self.failover_until.load(Ordering::Relaxed) {
                return Route::Secondary(url);
            }
        }
        Route::Primary(&self.primary_url)
    }

    fn trip_failover_at(&self, now: u64) {
        self.failover_until
            .store(now + self.failover_cooldown, Ordering::Relaxed);
    }

    /// Execute a query and return the response's `data` value.
    ///
    /// Never panics past this boundary; callers get a typed result and can
    /// choose to continue partial work.
    pub async fn execute(&self, operation: &'static str, query: &str) -> Result<Value, ClientError> {
        match self.route_at(now_millis()) {
            Route::Secondary(url) => {
                // Cool-down window: single attempt, no retry, no state change.
                self.post(url, operation, query).await.map_err(|err| {
                    error!(
                        "Operation '{}' failed on fallback endpoint: {}",
                        operation, err
                    );
                    err
                })
            }
            Route::Primary(url) => {
                let result = with_retry(
                    || self.post(url, operation, query),
                    self.retry_delay,
                    self.max_retries,
                    operation,
                    ClientError::is_transport,
                )
                .await;

                match result {
                    Ok(data) => Ok(data),
                    Err(err) if err.is_transport() => {
                        if self.secondary_url.is_some() {
                            self.trip_failover_at(now_millis());
                            warn!(
                                "Operation '{}' failed on primary endpoint: {}. Routing to fallback for {}s",
                                operation,
                                err,
                                self.failover_cooldown / 1000
                            );
                        } else {
                            error!("Operation '{}' failed on primary endpoint: {}", operation, err);
                        }
                        Err(err)
                    }
                    Err(err) => {
                        error!("Operation '{}' rejected by indexer: {}", operation, err);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Execute a query and deserialize the `data.<root>.items` page the
    /// indexer wraps every listing in.
    pub async fn fetch_items<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &str,
        root: &str,
    ) -> Result<Vec<T>, ClientError> {
        let data = self.execute(operation, query).await?;
        let items = match data.pointer(&format!("/{}/items", root)) {
            Some(items) if items.is_array() => items.clone(),
            _ => {
                return Err(ClientError::Query(format!(
                    "{}: response carried no '{}.items'",
                    operation, root
                )))
            }
        };
        serde_json::from_value(items)
            .map_err(|e| ClientError::Query(format!("{}: {}", operation, e)))
    }

    async fn post(&self, url: &str, operation: &'static str, query: &str) -> Result<Value, ClientError> {
        let body = serde_json::json!({ "query": query });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(operation, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transport(format!(
                "{}: upstream returned {}",
                operation, status
            )));
        }
        if !status.is_success() {
            return Err(ClientError::Query(format!(
                "{}: upstream returned {}",
                operation, status
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Query(format!("{}: unreadable payload: {}", operation, e)))?;

        if let Some(errors) = payload.get("errors") {
            if errors.as_array().map_or(false, |a| !a.is_empty()) {
                return Err(ClientError::Query(format!("{}: {}", operation, errors)));
            }
        }

        match payload.get("data") {
            Some(data) if !data.is_null() => Ok(data.clone()),
            _ => Err(ClientError::Query(format!(
                "{}: response carried no data",
                operation
            ))),
        }
    }
}

fn classify_send_error(operation: &str, err: reqwest::Error) -> ClientError {
    // Anything that kept the request from completing is a transport
    // failure: timeouts, refused connections, dropped sockets.
    ClientError::Transport(format!("{}: {}", operation, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_secondary() -> IndexerClient {
        IndexerClient::new(
            "http://primary.invalid/graphql".to_string(),
            Some("http://secondary.invalid/graphql".to_string()),
        )
        .unwrap()
        .with_failover_cooldown(Duration::from_secs(600))
    }

    fn routed_url(client: &IndexerClient, now: u64) -> String {
        match client.route_at(now) {
            Route::Primary(url) => format!("primary:{}", url),
            Route::Secondary(url) => format!("secondary:{}", url),
        }
    }

    #[test]
    fn test_failover_routes_to_secondary_within_cooldown() {
        let client = client_with_secondary();
        let t0 = 1_700_000_000_000;

        assert!(routed_url(&client, t0).starts_with("primary:"));

        client.trip_failover_at(t0);
        assert!(routed_url(&client, t0 + 1).starts_with("secondary:"));
        assert!(routed_url(&client, t0 + 599_999).starts_with("secondary:"));
    }

    #[test]
    fn test_failover_expires_lazily() {
        let client = client_with_secondary();
        let t0 = 1_700_000_000_000;

        client.trip_failover_at(t0);
        // First call at or after the cool-down timestamp reverts to primary
        assert!(routed_url(&client, t0 + 600_000).starts_with("primary:"));

        // A fresh transport failure re-activates the window
        client.trip_failover_at(t0 + 600_000);
        assert!(routed_url(&client, t0 + 600_001).starts_with("secondary:"));
    }

    #[test]
    fn test_no_failover_without_secondary() {
        let client =
            IndexerClient::new("http://primary.invalid/graphql".to_string(), None).unwrap();
        let t0 = 1_700_000_000_000;

        client.trip_failover_at(t0);
        assert!(routed_url(&client, t0 + 1).starts_with("primary:"));
    }

    #[test]
    fn test_error_classification() {
        assert!(ClientError::Transport("timed out".into()).is_transport());
        assert!(!ClientError::Query("malformed".into()).is_transport());
    }
}
