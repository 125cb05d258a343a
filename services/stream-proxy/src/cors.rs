//! Browser origin allow-list
//!
//! Two layers: `enforce_allowed_origin` rejects requests carrying an `Origin`
//! outside the list before they reach a handler, and `cors_layer` emits the
//! CORS response headers (and answers preflights) for permitted origins.
//! Requests without an `Origin` header (curl, server-to-server) always pass.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, warn};

/// Exact-match origin list.
#[derive(Debug, Clone)]
pub struct AllowedOrigins {
    origins: Arc<Vec<String>>,
}

impl AllowedOrigins {
    pub fn new(origins: Vec<String>) -> Self {
        Self {
            origins: Arc::new(origins),
        }
    }

    /// Absent origins are permitted; present ones must match exactly.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(o) => self.origins.iter().any(|allowed| allowed == o),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.origins.iter().map(String::as_str)
    }
}

/// CORS response headers for the allow-list, methods GET, POST and OPTIONS.
pub fn cors_layer(allowed: &AllowedOrigins) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, error = %e, "skipping invalid origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Reject requests whose `Origin` is not on the allow-list with 403.
pub async fn enforce_allowed_origin(
    State(allowed): State<AllowedOrigins>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|v| v.to_str().unwrap_or("<non-utf8>").to_string());

    if allowed.permits(origin.as_deref()) {
        return next.run(request).await;
    }

    debug!(origin = ?origin, path = %request.uri().path(), "rejecting unlisted origin");
    metrics::counter!("stream_proxy_rejected_origins_total").increment(1);
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "error": "Unauthorized origin" }).to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    fn allowed() -> AllowedOrigins {
        AllowedOrigins::new(vec![
            "https://ytify.us.kg".into(),
            "http://localhost:5173".into(),
        ])
    }

    fn app() -> Router {
        let origins = allowed();
        Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .layer(cors_layer(&origins))
            .layer(axum::middleware::from_fn_with_state(
                origins,
                enforce_allowed_origin,
            ))
    }

    #[test]
    fn permits_absent_and_listed_origins_only() {
        let origins = allowed();
        assert!(origins.permits(None));
        assert!(origins.permits(Some("https://ytify.us.kg")));
        assert!(!origins.permits(Some("https://ytify.us.kg.evil.com")));
        assert!(!origins.permits(Some("http://localhost:3000")));
    }

    #[tokio::test]
    async fn request_without_origin_passes() {
        let response = app()
            .oneshot(Request::builder().uri("/api/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listed_origin_gets_cors_headers() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/ping")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn unlisted_origin_is_rejected_before_handler() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/ping")
                    .header("origin", "https://elsewhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Unauthorized origin");
    }

    #[tokio::test]
    async fn preflight_from_listed_origin_is_answered() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/ping")
                    .header("origin", "https://ytify.us.kg")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_success());
        let methods = response
            .headers()
            .get("access-control-allow-methods")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(methods.contains("GET"), "{methods}");
        assert!(methods.contains("OPTIONS"), "{methods}");
    }
}
