//! Liveness endpoint.
//!
//! # Endpoints
//!
//! - `GET /health` - Always 200 while the process is serving
//!
//! Exempt from authentication and rate limiting so load balancers and
//! orchestrators can probe freely.

use axum::Json;
use chrono::Utc;
use tracing::instrument;

use crate::config::SERVICE_NAME;
use crate::models::HealthResponse;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "service": "frbox",
///   "version": "1.0.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}
