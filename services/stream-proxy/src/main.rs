//! RapidAPI Stream Proxy
//!
//! Single-binary Rust service that:
//! 1. Accepts `GET /api/streams/{videoId}` from allow-listed browser origins
//! 2. Fetches stream metadata from the RapidAPI provider, rotating API keys
//!    on rate limits, quota exhaustion and transport failures
//! 3. Returns the audio formats as a Piped-style streams payload

mod config;
mod cors;
mod error;
mod metrics;
mod normalize;
mod streams;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use key_pool::{KeyPool, RetryExecutor};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::HttpTransport;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::cors::AllowedOrigins;
use crate::streams::StreamsState;

/// Process-wide counters surfaced on `/health`.
#[derive(Clone)]
struct ServiceMetrics {
    requests_total: Arc<AtomicU64>,
    errors_total: Arc<AtomicU64>,
    started_at: Instant,
}

impl ServiceMetrics {
    fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    streams: StreamsState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
struct StreamsQuery {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

/// Build the axum router with all routes and shared state.
///
/// The origin gate wraps only the streams routes; `/health` and `/metrics`
/// are for operators, not browsers.
fn build_router(state: AppState, max_connections: usize, origins: AllowedOrigins) -> Router {
    let api = Router::new()
        .route("/api/streams", get(streams_by_query))
        .route("/api/streams/", get(streams_by_query))
        .route("/api/streams/{video_id}", get(streams_by_path))
        .layer(cors::cors_layer(&origins))
        .layer(axum::middleware::from_fn_with_state(
            origins,
            cors::enforce_allowed_origin,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting rapidapi-stream-proxy");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let endpoint = config.endpoint().context("invalid upstream endpoint")?;
    let upstream_host = config.upstream_host();
    let policy = config.rotation.policy();

    info!(
        listen_addr = %config.server.listen_addr,
        endpoint = %endpoint,
        upstream_host = %upstream_host,
        keys = config.keys.len(),
        mode = ?policy.mode(),
        "configuration loaded"
    );

    let pool = KeyPool::new(std::mem::take(&mut config.keys))
        .context("no API keys configured: set RAPIDAPI_KEYS or upstream.keys_file")?;

    let transport = HttpTransport::new(
        reqwest::Client::new(),
        Duration::from_secs(config.upstream.timeout_secs),
    );

    let executor = RetryExecutor::new(Arc::new(pool), policy, Arc::new(transport), upstream_host);

    let app_state = AppState {
        streams: StreamsState {
            executor: Arc::new(executor),
            endpoint,
            normalizer: config.normalizer.clone(),
        },
        metrics: ServiceMetrics::new(),
        prometheus: prometheus_handle,
    };

    let origins = AllowedOrigins::new(config.cors.allowed_origins.clone());
    let app = build_router(app_state, config.server.max_connections, origins);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt: notify the server to stop
    // accepting, then race the drain against the timeout.
    let drain_timeout = Duration::from_secs(config.server.drain_timeout_secs);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());

    match tokio::time::timeout(drain_timeout, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = drain_timeout.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn streams_by_path(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Response {
    serve_streams(&state, Some(&video_id)).await
}

async fn streams_by_query(
    State(state): State<AppState>,
    Query(query): Query<StreamsQuery>,
) -> Response {
    serve_streams(&state, query.video_id.as_deref()).await
}

async fn serve_streams(state: &AppState, video_id: Option<&str>) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let response = streams::handle(&state.streams, video_id).await;
    if !response.status().is_success() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    response
}

/// Health endpoint: service counters plus the key pool summary.
/// Returns 503 with status "degraded" while the pool is cooling down.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    let pool = state.streams.executor.pool();
    let cooling_down = pool.cooldown_remaining().await.is_some();

    let (status_code, status) = if cooling_down {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (axum::http::StatusCode::OK, "healthy")
    };

    let body = serde_json::json!({
        "status": status,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "pool": pool.health().await,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
