//! Prometheus metrics exposition
//!
//! - `stream_proxy_requests_total` (counter): label `status`
//! - `stream_proxy_request_duration_seconds` (histogram): label `status`
//! - `stream_proxy_upstream_errors_total` (counter): label `error_type`
//! - `stream_proxy_rejected_origins_total` (counter)
//! - `key_pool_rotations_total` (counter, emitted by the key pool): label `reason`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries from 5ms up to 120s; one call can spend several
/// upstream timeouts while rotating keys.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("stream_proxy_request_duration_seconds".to_string()),
        DURATION_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed streams request.
pub fn record_request(status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("stream_proxy_requests_total", "status" => status_str.clone()).increment(1);
    metrics::histogram!("stream_proxy_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a failed streams request by error classification.
pub fn record_upstream_error(error_type: &'static str) {
    metrics::counter!("stream_proxy_upstream_errors_total", "error_type" => error_type)
        .increment(1);
}
