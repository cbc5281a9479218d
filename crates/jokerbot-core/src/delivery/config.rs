use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Retry budget shared by every operation that talks to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub retry_limit: u32,
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Connection settings for the comment relay service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub base_url: Url,
    /// Bearer token sent with every request
    pub token: Option<String>,
    pub user_agent: String,
    pub poll_interval_ms: u64,
    /// Events requested per poll
    pub batch_limit: u32,
    pub connect_timeout_seconds: u32,
    pub request_timeout_seconds: u32,
}

impl RelayConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            token: None,
            user_agent: concat!("jokerbot/", env!("CARGO_PKG_VERSION")).to_string(),
            poll_interval_ms: 2_000,
            batch_limit: 100,
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolves `path` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        with_trailing_slash(self.base_url.clone()).join(path)
    }
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
