// src/utils/http.rs

//! HTTP client utilities.
//!
//! Every network fetch in the crate goes through [`FetchClient`], which
//! applies one bounded retry policy: transient statuses and transport
//! failures are retried with exponential backoff up to a fixed attempt
//! ceiling; any other non-success status fails immediately.
//!
//! The client-wide timeout covers small lookups. Map queries and tile
//! downloads carry their own, longer per-request timeouts.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};

use crate::error::{AppError, Result};
use crate::models::{Fetched, HttpConfig, RetryConfig};

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Attempt ceiling, backoff schedule and transient status set.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    retry_statuses: Vec<StatusCode>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let retry_statuses = config
            .retry_statuses
            .iter()
            .filter_map(|code| match StatusCode::from_u16(*code) {
                Ok(status) => Some(status),
                Err(_) => {
                    log::warn!("Ignoring invalid retry status {code}");
                    None
                }
            })
            .collect();

        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            retry_statuses,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status)
    }

    /// Delay after the `failed_attempt`-th failure (1-based): base, 2×base, 4×base, …
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// HTTP fetcher with the crate-wide retry policy. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    policy: Arc<RetryPolicy>,
    query_timeout: Duration,
    download_timeout: Duration,
}

impl FetchClient {
    /// Build a client and policy from configuration.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            policy: Arc::new(RetryPolicy::from_config(&config.retry)),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        })
    }

    /// GET `url` and return its body. Bounded by the client-wide timeout.
    pub async fn get(&self, url: &str) -> Result<Fetched> {
        self.send(url, || self.client.get(url)).await
    }

    /// GET a large payload such as a tile archive.
    pub async fn download(&self, url: &str) -> Result<Fetched> {
        self.send(url, || self.client.get(url).timeout(self.download_timeout))
            .await
    }

    /// POST a map query as plain text to `url` and return the response body.
    pub async fn post(&self, url: &str, body: &str) -> Result<Fetched> {
        self.send(url, || {
            self.client
                .post(url)
                .body(body.to_owned())
                .timeout(self.query_timeout)
        })
        .await
    }

    async fn send<F>(&self, url: &str, build: F) -> Result<Fetched>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.policy.max_attempts;
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => {
                                return Ok(Fetched {
                                    url: url.to_string(),
                                    bytes: bytes.to_vec(),
                                    attempts: attempt,
                                });
                            }
                            Err(e) if is_transient(&e) => last_failure = e.to_string(),
                            Err(e) => return Err(e.into()),
                        }
                    } else if self.policy.is_retryable(status) {
                        last_failure = status.to_string();
                    } else {
                        return Err(AppError::Status {
                            url: url.to_string(),
                            status,
                        });
                    }
                }
                Err(e) if is_transient(&e) => last_failure = e.to_string(),
                Err(e) => return Err(e.into()),
            }

            if attempt < max_attempts {
                let delay = self.policy.delay(attempt);
                log::debug!(
                    "Attempt {}/{} for {} failed ({}). Retrying in {:?}",
                    attempt,
                    max_attempts,
                    url,
                    last_failure,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(AppError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last: last_failure,
        })
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request() || error.is_body()
}
