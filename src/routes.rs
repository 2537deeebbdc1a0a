//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Set Request ID   │ ← X-Request-Id generated if absent
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← Span per request, rejected ones included
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Propagate Req ID │ ← X-Request-Id echoed on the response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Pipeline     │ ← preflight → auth (401) → rate limit (429) → size (413)
//! └────────┬─────────┘   + security headers on every response
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Answers preflight, adds CORS headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← Bounds bodies without Content-Length
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `POST /embedding` - Image → face embedding
//! - `POST /verify` - Embedding pair → match decision
//! - `GET /health` - Liveness (auth and rate limit bypassed)
//! - `GET /openapi.json`, `GET /docs` - API description (auth bypassed)

use axum::Router;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Request};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::handlers;
use crate::middleware::PipelineLayer;
use crate::state::AppState;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with all routes and middleware configured.
///
/// # Middleware Configuration
///
/// - **Authentication**: Enabled if `API_KEYS` is non-empty
/// - **Rate Limiting**: Enabled if `RATE_LIMIT_PER_MINUTE > 0`
/// - **CORS**: Configured from `ALLOWED_ORIGINS`
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    if config.auth_enabled() {
        info!(keys = config.api_keys.len(), "API key authentication enabled");
    } else {
        info!("API key authentication disabled (no API_KEYS set)");
    }

    if config.rate_limiting_enabled() {
        info!(
            per_minute = config.rate_limit_per_minute,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_PER_MINUTE=0)");
    }

    info!(
        max_size_bytes = config.max_image_size,
        "Request body size limit configured"
    );

    let cors = build_cors_layer(config);
    let pipeline = PipelineLayer::new(state.pipeline.clone());
    let body_limit = DefaultBodyLimit::max(config.max_image_size);

    // =========================================================================
    // Routes, then layers from innermost to outermost
    // =========================================================================
    Router::new()
        .route("/embedding", post(handlers::create_embedding))
        .route("/verify", post(handlers::verify_embeddings))
        .route("/health", get(handlers::health_check))
        .route("/openapi.json", get(handlers::openapi))
        .route("/docs", get(handlers::openapi))
        .layer(body_limit)
        .layer(cors)
        .layer(pipeline)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info_span!(
                    "http_request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Build CORS layer from configuration.
///
/// An empty list or one containing `*` allows any origin. Unparseable
/// origins are skipped with a warning.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!(origin = %o, "Invalid origin in ALLOWED_ORIGINS, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::services::{DetectedFace, DetectionError, FaceDetector};
    use crate::validation::DecodedImage;

    struct NoFaces;

    #[async_trait]
    impl FaceDetector for NoFaces {
        async fn detect(&self, _image: &DecodedImage) -> Result<Vec<DetectedFace>, DetectionError> {
            Ok(vec![])
        }
    }

    fn router(config: Config) -> Router {
        build_router(AppState::new(config, Arc::new(NoFaces)))
    }

    #[tokio::test]
    async fn test_health_has_request_id_and_security_headers() {
        let response = router(Config::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_request_id_propagated() {
        let response = router(Config::default())
            .oneshot(
                Request::get("/health")
                    .header(REQUEST_ID_HEADER, "corr-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "corr-123");
    }

    #[tokio::test]
    async fn test_unknown_route_still_hardened() {
        let response = router(Config::default())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn test_preflight_answered_by_cors() {
        let config = Config {
            api_keys: ["secret".to_string()].into_iter().collect(),
            allowed_origins: vec!["https://app.example".to_string()],
            ..Config::default()
        };
        let response = router(config)
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/embedding")
                    .header("origin", "https://app.example")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://app.example"
        );
        assert_eq!(response.headers()["x-xss-protection"], "1; mode=block");
    }

    #[tokio::test]
    async fn test_health_and_docs_open_with_custom_bypass_list() {
        let vars = [("API_KEYS", "secret"), ("AUTH_BYPASS_PATHS", "/status")];
        let config = Config::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        })
        .unwrap();
        let app = router(config);

        for path in ["/health", "/docs", "/openapi.json"] {
            let response = app
                .clone()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path} without key");
        }

        let response = app
            .oneshot(Request::post("/verify").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_build_cors_layer_variants() {
        // Just verify construction doesn't panic
        let origins = |list: &[&str]| Config {
            allowed_origins: list.iter().map(|o| (*o).to_string()).collect(),
            ..Config::default()
        };
        let _any = build_cors_layer(&origins(&[]));
        let _star = build_cors_layer(&origins(&["*"]));
        let _list = build_cors_layer(&origins(&["https://example.com", "not a\nvalid origin"]));
    }
}
