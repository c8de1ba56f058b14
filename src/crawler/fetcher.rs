//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the shared HTTP client with a descriptive user agent
//! - GET requests with a per-request timeout
//! - Exponential backoff for transient failures
//! - Error classification

use crate::config::{CrawlerConfig, UserAgentConfig};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Why a URL could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// 4xx response; never retried
    #[error("HTTP {status} for {url}")]
    ClientError { url: String, status: u16 },

    /// 5xx, network or timeout errors persisted through every attempt
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Anything else, e.g. an unexpected status or an unreadable body
    #[error("Unexpected error fetching {url}: {message}")]
    Unexpected { url: String, message: String },
}

/// How often and how patiently transient failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Delay after the zero-based `attempt` failed: `base * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Builds the HTTP client shared by every fetch of a run
///
/// The user agent has the form `Name/Version (+ContactURL; ContactEmail)`.
///
/// # Example
///
/// ```no_run
/// use shelfwatch::config::UserAgentConfig;
/// use shelfwatch::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "Shelfwatch".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Outcome of a single attempt
enum Attempt {
    Done(String),
    Transient(String),
    Permanent(FetchFailure),
}

/// Fetches pages with retries; cheap to clone
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetches `url` and returns its body
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return body |
    /// | 4xx | Fail immediately |
    /// | 5xx | Retry with backoff |
    /// | Timeout / connection error | Retry with backoff |
    /// | Anything else | Fail immediately |
    pub async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        let attempts = self.policy.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.attempt(url).await {
                Attempt::Done(body) => return Ok(body),
                Attempt::Permanent(failure) => {
                    tracing::warn!("{}", failure);
                    return Err(failure);
                }
                Attempt::Transient(message) => {
                    last_error = message;
                    if attempt + 1 < attempts {
                        let delay = self.policy.delay_for(attempt);
                        tracing::warn!(
                            "{} for {}, retrying in {:?} (attempt {}/{})",
                            last_error,
                            url,
                            delay,
                            attempt + 1,
                            attempts
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!("Failed to fetch {} after {} attempts", url, attempts);
        Err(FetchFailure::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Attempt::Transient("Request timeout".to_string()),
            Err(e) if e.is_connect() || e.is_request() => {
                return Attempt::Transient(format!("Request error: {}", e))
            }
            Err(e) => {
                return Attempt::Permanent(FetchFailure::Unexpected {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Attempt::Transient(format!("Server error {}", status.as_u16()));
        }
        if status.is_client_error() {
            return Attempt::Permanent(FetchFailure::ClientError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Attempt::Permanent(FetchFailure::Unexpected {
                url: url.to_string(),
                message: format!("unexpected status {}", status.as_u16()),
            });
        }

        match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(e) if e.is_timeout() => Attempt::Transient("Timeout reading body".to_string()),
            Err(e) => Attempt::Permanent(FetchFailure::Unexpected {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "test@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&create_test_config(), Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_policy_from_config() {
        let config = CrawlerConfig {
            base_url: "https://books.toscrape.com".to_string(),
            timeout_secs: 30,
            max_retries: 4,
            retry_delay_ms: 250,
            batch_size: 10,
            batch_delay_ms: 500,
            resume_window_hours: 24,
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
