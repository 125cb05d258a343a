//! Streams lookup: one video id in, one Piped-style payload out

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::response::{IntoResponse, Response};
use key_pool::RetryExecutor;
use reqwest::Url;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::{info, instrument, warn};
use upstream::UpstreamRequest;

use crate::config::NormalizerConfig;
use crate::error::ApiError;
use crate::normalize::{PipedStreams, StreamPayload, normalize};

/// Shared state for the streams handler.
#[derive(Clone)]
pub struct StreamsState {
    pub executor: Arc<RetryExecutor>,
    /// Upstream `/dl` endpoint; the video id is appended as `?id=`.
    pub endpoint: Url,
    pub normalizer: NormalizerConfig,
}

impl StreamsState {
    fn request_for(&self, video_id: &str) -> UpstreamRequest {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("id", video_id);
        let mut request = UpstreamRequest::get(url.as_str());
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request
    }
}

/// Fetch and normalize streams for `video_id`.
#[instrument(skip(state, request_id), fields(request_id = %request_id))]
pub async fn fetch_streams(
    state: &StreamsState,
    video_id: Option<&str>,
    request_id: &str,
) -> Result<PipedStreams, ApiError> {
    let video_id = video_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MissingParameter)?;

    let request = state.request_for(video_id);
    let response = state.executor.execute(&request).await?;

    // A literal `null` body counts as no data, same as a missing format list.
    let payload: Option<StreamPayload> = serde_json::from_slice(&response.body)?;
    let payload = payload.ok_or(ApiError::NoStreamingData)?;
    normalize(payload, &state.normalizer)
}

/// Run one lookup and render it, recording request metrics.
pub async fn handle(state: &StreamsState, video_id: Option<&str>) -> Response {
    let start = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let result = fetch_streams(state, video_id, &request_id).await;
    let duration = start.elapsed();

    match result {
        Ok(streams) => {
            crate::metrics::record_request(200, duration.as_secs_f64());
            info!(
                request_id = %request_id,
                audio_streams = streams.audio_streams.len(),
                latency_ms = duration.as_millis() as u64,
                "streams served"
            );
            Json(streams).into_response()
        }
        Err(e) => {
            let status = e.status();
            crate::metrics::record_request(status.as_u16(), duration.as_secs_f64());
            crate::metrics::record_upstream_error(e.error_type());
            warn!(
                request_id = %request_id,
                status = status.as_u16(),
                error_type = e.error_type(),
                error = %e,
                latency_ms = duration.as_millis() as u64,
                "streams request failed"
            );
            e.into_response()
        }
    }
}
