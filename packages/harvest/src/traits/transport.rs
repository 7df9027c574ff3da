//! Transport trait for HTTP round-trips.
//!
//! The pipeline depends only on "send request, receive status + final URL +
//! body". Production uses [`crate::transports::HttpTransport`]; tests use
//! [`crate::testing::MockTransport`].

use async_trait::async_trait;

use crate::error::{FetchError, FetchResult};

/// A completed HTTP round-trip.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,

    /// Final URL after redirects
    pub url: String,

    /// Response body as text
    pub body: String,
}

impl Response {
    /// Create a response.
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error out on non-2xx statuses, passing the body through otherwise.
    pub fn error_for_status(self) -> FetchResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                status: self.status,
                url: self.url,
            })
        }
    }
}

/// Transport over which catalog requests are sent.
///
/// Implementations are expected to follow redirects, reuse connections, and
/// enforce a per-request timeout, surfacing it as [`FetchError::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Plain GET of a page.
    async fn get(&self, url: &str) -> FetchResult<Response>;

    /// POST a form-encoded body.
    ///
    /// Fields are sent in the given order; hidden state fields must reach
    /// the server byte-for-byte as extracted.
    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> FetchResult<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let ok = Response::new(200, "http://catalog.test/", "body");
        assert!(ok.error_for_status().is_ok());

        let err = Response::new(500, "http://catalog.test/", "")
            .error_for_status()
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }
}
