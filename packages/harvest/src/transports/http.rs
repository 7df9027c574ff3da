//! HTTP transport over a shared reqwest client.
//!
//! One client per run: connection reuse matters when a harvest issues tens
//! of thousands of requests against a single host. State rides in the
//! hidden form fields, so no cookie jar is required; redirects are followed
//! and the final URL is reported so pagination can post back to wherever
//! the search actually landed.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::traits::transport::{Response, Transport};

/// Stateful catalogs sniff obvious bot agents; present a browser.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest-backed [`Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a transport with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn map_error(url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http(Box::new(error))
        }
    }

    async fn read(url: &str, response: reqwest::Response) -> FetchResult<Response> {
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(url, e))?;
        Ok(Response::new(status, final_url, body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> FetchResult<Response> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "GET failed");
                Self::map_error(url, e)
            })?;
        Self::read(url, response).await
    }

    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> FetchResult<Response> {
        debug!(url = %url, fields = fields.len(), "POST");
        let response = self
            .client
            .post(url)
            .header("User-Agent", &self.user_agent)
            .form(&fields)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "POST failed");
                Self::map_error(url, e)
            })?;
        Self::read(url, response).await
    }
}
