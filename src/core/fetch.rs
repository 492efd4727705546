// src/core/fetch.rs

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::error::FetchError;

/// What came back from a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx answer into an error.
    pub fn ensure_success(self) -> Result<Self, FetchError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Retrieves remote resources on behalf of modules.
///
/// Modules never talk to the network directly, so scans can be driven with a
/// stub in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// `reqwest`-backed fetcher with the configured user agent and timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        debug!(url, "Fetching resource.");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url, error = %e, "Request failed.");
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string() }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = value.to_str().unwrap_or("[Invalid UTF-8]");
                (name.as_str().to_string(), value.to_string())
            })
            .collect();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            reason: format!("could not read body: {e}"),
        })?;

        debug!(url, status, bytes = body.len(), "Resource fetched.");
        Ok(FetchResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}
