//! Request errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Everything a streams request can fail with. Every variant renders as a
/// JSON body; nothing crosses the HTTP boundary as a panic.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Video ID is required")]
    MissingParameter,

    #[error("{0}")]
    Fetch(#[from] key_pool::Error),

    #[error("No streaming data available")]
    NoStreamingData,

    #[error("invalid upstream payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParameter => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the upstream error counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::MissingParameter => "missing_parameter",
            ApiError::Fetch(key_pool::Error::AllKeysExhausted { .. }) => "all_keys_exhausted",
            ApiError::Fetch(key_pool::Error::CoolingDown { .. }) => "cooling_down",
            ApiError::Fetch(key_pool::Error::UpstreamHttp { .. }) => "upstream_http",
            ApiError::Fetch(_) => "key_pool",
            ApiError::NoStreamingData => "no_streaming_data",
            ApiError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if matches!(self, ApiError::MissingParameter) {
            serde_json::json!({ "error": self.to_string() })
        } else {
            serde_json::json!({
                "error": "Failed to fetch video data",
                "details": self.to_string(),
            })
        };
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
