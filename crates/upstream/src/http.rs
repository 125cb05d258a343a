//! reqwest-backed transport

use crate::{Transport, TransportError, UpstreamRequest, UpstreamResponse};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Sends requests with a shared `reqwest::Client` and a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send(
        &self,
        request: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = crate::Result<UpstreamResponse>> + Send + '_>> {
        Box::pin(async move {
            debug!(url = %request.url, "sending upstream request");
            let response = self
                .client
                .get(&request.url)
                .headers(request.headers)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify_reqwest_error)?;

            Ok(UpstreamResponse {
                status,
                headers,
                body,
            })
        })
    }
}
