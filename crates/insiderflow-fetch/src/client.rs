//! HTTP client for the filing source: identifies itself, passes every
//! request through the [`RateGate`], and retries 429 / 5xx responses.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{FetchError, RateGate, RetryPolicy};

pub const DEFAULT_DATA_BASE_URL: &str = "https://data.sec.gov";
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://www.sec.gov";

/// Connection settings for [`SourceClient`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Descriptive client header, e.g. `"Acme Research ops@acme.example"`.
    pub user_agent: String,
    /// Base for the submissions feed.
    pub data_base_url: String,
    /// Base for archives and the browse feed.
    pub archive_base_url: String,
    pub request_interval: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl FetchConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            data_base_url: DEFAULT_DATA_BASE_URL.to_string(),
            archive_base_url: DEFAULT_ARCHIVE_BASE_URL.to_string(),
            request_interval: crate::gate::DEFAULT_REQUEST_INTERVAL,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Point both bases at one server (used against mock servers).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        self.data_base_url = base.clone();
        self.archive_base_url = base;
        self
    }
}

/// Rate-gated HTTP client for the filing source.
pub struct SourceClient {
    client: reqwest::Client,
    gate: Arc<RateGate>,
    retry: RetryPolicy,
    data_base_url: String,
    archive_base_url: String,
}

impl SourceClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let gate = Arc::new(RateGate::new(config.request_interval));
        Self::with_gate(config, gate)
    }

    /// Build a client that shares an existing gate with other clients in this process.
    pub fn with_gate(config: &FetchConfig, gate: Arc<RateGate>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            gate,
            retry: config.retry,
            data_base_url: config.data_base_url.trim_end_matches('/').to_string(),
            archive_base_url: config.archive_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn data_base_url(&self) -> &str {
        &self.data_base_url
    }

    pub fn archive_base_url(&self) -> &str {
        &self.archive_base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET a URL as text with the client's default retry budget.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.get_text_with_retries(url, self.retry.max_retries).await
    }

    /// GET a URL as text, retrying the same URL up to `max_retries` times
    /// on 429, 5xx, or connection failures.
    pub async fn get_text_with_retries(
        &self,
        url: &str,
        max_retries: u32,
    ) -> Result<String, FetchError> {
        let mut last_err = None;
        for attempt in 0..=max_retries {
            self.gate.acquire().await;
            debug!(url = %url, attempt, "GET");

            let err = match self.client.get(url).send().await {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!(url = %url, attempt, "upstream returned 429");
                    FetchError::Throttled {
                        url: url.to_string(),
                        attempts: attempt + 1,
                    }
                }
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(url = %url, attempt, status = resp.status().as_u16(), "upstream server error");
                    FetchError::Server {
                        status: resp.status().as_u16(),
                        url: url.to_string(),
                    }
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(FetchError::Server {
                        status: resp.status().as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(resp) => return Ok(resp.text().await?),
                Err(e) => {
                    let err = FetchError::Http(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    warn!(url = %url, attempt, error = %err, "request failed");
                    err
                }
            };

            last_err = Some(err);
            if attempt < max_retries {
                self.retry.pause(attempt).await;
            }
        }

        let err = last_err.unwrap_or(FetchError::Throttled {
            url: url.to_string(),
            attempts: max_retries + 1,
        });
        info!(url = %url, error = %err, "retries exhausted");
        Err(err)
    }

    /// GET a URL and decode the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        Ok(serde_json::from_str(&body)?)
    }
}
