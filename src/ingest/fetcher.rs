//! Rate-limited HTTP fetcher
//!
//! This module handles all outbound requests for ingestion, including:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Enforcing a minimum spacing between the start of consecutive requests
//! - Retrying transient failures with exponential backoff
//! - Error classification
//!
//! # Retry Logic
//!
//! | Condition | Action |
//! |-----------|--------|
//! | HTTP 5xx | Retry up to `max-retries` times |
//! | Timeout / connection failure | Retry up to `max-retries` times |
//! | HTTP 4xx (including 429) | Fail immediately |
//! | Malformed or non-http(s) URL | Fail immediately, no request sent |
//! | Non-HTML Content-Type | Fail immediately |

use crate::config::{FetcherConfig, UserAgentConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// A page that could not be fetched
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{url} returned HTTP {status} after {attempts} attempt(s)")]
    HttpStatus {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Network {
        url: String,
        attempts: u32,
        source: reqwest::Error,
    },

    #[error("{url} is not HTML (Content-Type '{content_type}')")]
    ContentMismatch { url: String, content_type: String },
}

impl FetchError {
    /// The URL that failed
    pub fn url(&self) -> &str {
        match self {
            Self::InvalidUrl { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::Network { url, .. }
            | Self::ContentMismatch { url, .. } => url,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`, capped
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Why a single attempt failed
#[derive(Debug)]
enum AttemptFailure {
    Status(StatusCode),
    Network(reqwest::Error),
    ContentType(String),
}

impl AttemptFailure {
    fn is_transient(&self) -> bool {
        match self {
            Self::Status(status) => status.is_server_error(),
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::ContentType(_) => false,
        }
    }

    fn into_error(self, url: &str, attempts: u32) -> FetchError {
        let url = url.to_string();
        match self {
            Self::Status(status) => FetchError::HttpStatus {
                url,
                status: status.as_u16(),
                attempts,
            },
            Self::Network(source) => FetchError::Network {
                url,
                attempts,
                source,
            },
            Self::ContentType(content_type) => FetchError::ContentMismatch { url, content_type },
        }
    }
}

/// HTTP fetcher that spaces out requests and retries transient failures
///
/// The spacing belongs to the fetcher: every caller sharing an instance,
/// sequential or concurrent, waits its turn. Retry attempts count as
/// requests and are spaced too.
pub struct RateLimitedFetcher {
    client: Client,
    spacing: Duration,
    retry: RetryPolicy,
    /// Start time of the most recent request; held across the spacing sleep
    last_request: Mutex<Option<Instant>>,
}

impl RateLimitedFetcher {
    /// Builds a fetcher from configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use spine_tracker::config::{FetcherConfig, UserAgentConfig};
    /// use spine_tracker::ingest::RateLimitedFetcher;
    ///
    /// let user_agent = UserAgentConfig {
    ///     crawler_name: "SpineTracker".to_string(),
    ///     crawler_version: "1.0".to_string(),
    ///     contact_url: "https://example.com/about".to_string(),
    ///     contact_email: "admin@example.com".to_string(),
    /// };
    ///
    /// let fetcher = RateLimitedFetcher::new(&FetcherConfig::default(), &user_agent).unwrap();
    /// ```
    pub fn new(config: &FetcherConfig, user_agent: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent.header_value())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            spacing: Duration::from_millis(config.request_spacing_ms),
            retry: RetryPolicy::from_config(config),
            last_request: Mutex::new(None),
        })
    }

    /// Minimum time between the start of two requests
    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetches `url` and returns the response body
    ///
    /// Transient failures are retried per the [`RetryPolicy`]; anything else,
    /// or a transient failure that outlives the retry budget, is returned as a
    /// [`FetchError`] for the caller to handle.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = parse_http_url(url)?;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.wait_for_slot().await;
            tracing::debug!(url, attempt, "Fetching");

            let failure = match self.attempt(&parsed).await {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            if failure.is_transient() && attempt <= self.retry.max_retries {
                let delay = self.retry.delay_for_retry(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient fetch failure ({:?}), retrying",
                    failure
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let error = failure.into_error(url, attempt);
            tracing::warn!(url, attempt, "Fetch failed: {}", error);
            return Err(error);
        }
    }

    /// Blocks until `spacing` has passed since the previous request started
    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + self.spacing).await;
        }
        *last = Some(Instant::now());
    }

    async fn attempt(&self, url: &Url) -> Result<String, AttemptFailure> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(AttemptFailure::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure::Status(status));
        }

        // A missing header is accepted; a present one must say HTML
        if let Some(value) = response.headers().get(CONTENT_TYPE) {
            let content_type = value.to_str().unwrap_or_default().to_ascii_lowercase();
            if !content_type.contains("html") {
                return Err(AttemptFailure::ContentType(content_type));
            }
        }

        response.text().await.map_err(AttemptFailure::Network)
    }
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", scheme),
        }),
    }
}
