//! Outbound seam for the streaming-metadata provider
//!
//! Defines the `Transport` trait that decouples the key rotation loop from the
//! HTTP client. `HttpTransport` is the production implementation; tests drive
//! the rotation loop with scripted transports instead of a live network.

pub mod credentials;
pub mod http;

pub use credentials::{API_HOST_HEADER, API_KEY_HEADER, CredentialError, inject_credentials};
pub use http::HttpTransport;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

/// Response header the provider uses to report the remaining per-key budget.
pub const REMAINING_REQUESTS_HEADER: &str = "x-ratelimit-requests-remaining";

/// A request template. The rotation loop clones it per attempt and injects
/// the credential headers for the key in use.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub headers: HeaderMap,
}

impl UpstreamRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }
}

/// A fully buffered upstream response.
///
/// The body is read eagerly because rotation decisions inspect its text.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Parse a header value as a signed integer. Absent, non-UTF-8 and
    /// non-numeric values all yield `None`.
    pub fn header_i64(&self, name: &str) -> Option<i64> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    }
}

/// Transport-level failures: the request never produced an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("failed to read upstream body: {0}")]
    Body(String),

    #[error("upstream request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connection",
            TransportError::Body(_) => "body",
            TransportError::Other(_) => "other",
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Issues one outbound request.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http").
    fn id(&self) -> &str;

    fn send(
        &self,
        request: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn response_with_header(name: &'static str, value: &'static str) -> UpstreamResponse {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        UpstreamResponse {
            status: 200,
            headers,
            body: Bytes::new(),
        }
    }

    #[test]
    fn header_i64_parses_integer() {
        let resp = response_with_header(REMAINING_REQUESTS_HEADER, "7");
        assert_eq!(resp.header_i64(REMAINING_REQUESTS_HEADER), Some(7));
    }

    #[test]
    fn header_i64_tolerates_whitespace() {
        let resp = response_with_header(REMAINING_REQUESTS_HEADER, " 42 ");
        assert_eq!(resp.header_i64(REMAINING_REQUESTS_HEADER), Some(42));
    }

    #[test]
    fn header_i64_rejects_garbage_and_absence() {
        let resp = response_with_header(REMAINING_REQUESTS_HEADER, "plenty");
        assert_eq!(resp.header_i64(REMAINING_REQUESTS_HEADER), None);
        assert_eq!(resp.header_i64("x-missing"), None);
    }

    #[test]
    fn success_range_is_2xx() {
        let mut resp = response_with_header("x", "y");
        assert!(resp.is_success());
        resp.status = 204;
        assert!(resp.is_success());
        resp.status = 302;
        assert!(!resp.is_success());
        resp.status = 429;
        assert!(!resp.is_success());
    }

    #[test]
    fn text_replaces_invalid_utf8() {
        let resp = UpstreamResponse {
            status: 500,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"bad \xff byte"),
        };
        assert_eq!(resp.text(), "bad \u{fffd} byte");
    }

    #[test]
    fn transport_error_labels() {
        assert_eq!(TransportError::Timeout("30s".into()).label(), "timeout");
        assert_eq!(TransportError::Connect("refused".into()).label(), "connection");
        assert_eq!(TransportError::Body("eof".into()).label(), "body");
        assert_eq!(TransportError::Other("?".into()).label(), "other");
    }
}
