//! HTTP client for the claude.ai usage endpoint
//!
//! Each call is a single authenticated GET bounded by the client's timeout.
//! Nothing is retried here; a failed call simply waits for the scheduler's
//! next poll.

use crate::config::AccountConfig;
use crate::core::{UsageFetcher, UsageSnapshot};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

pub const DEFAULT_BASE_URL: &str = "https://claude.ai";
pub const USER_AGENT: &str = concat!("claude-usage-exporter/", env!("CARGO_PKG_VERSION"));

/// Why a fetch produced no snapshot.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("decode: {0}")]
    Decode(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e)
        } else if e.is_decode() {
            FetchError::Decode(e)
        } else {
            FetchError::Network(e)
        }
    }
}

/// Fetches usage snapshots from claude.ai using an account's session cookie.
///
/// The wrapped `reqwest::Client` is cheap to clone; every account shares the
/// same connection pool.
#[derive(Debug, Clone)]
pub struct ClaudeUsageFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ClaudeUsageFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Builds the shared HTTP client with a per-request timeout.
    pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
    }

    fn usage_url(&self, org_id: &str) -> String {
        format!(
            "{}/api/organizations/{}/usage",
            self.base_url.trim_end_matches('/'),
            org_id
        )
    }
}

#[async_trait]
impl UsageFetcher for ClaudeUsageFetcher {
    async fn fetch(&self, account: &AccountConfig) -> Result<UsageSnapshot, FetchError> {
        let url = self.usage_url(&account.org_id);
        trace!(account = %account.name, %url, "Fetching usage");

        let response = self
            .client
            .get(&url)
            .header(COOKIE, format!("sessionKey={}", account.session_key))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status));
        }

        Ok(response.json::<UsageSnapshot>().await?)
    }
}
