//! Prometheus metrics for application observability.
//!
//! Metrics are exposed via a dedicated HTTP listener on `METRICS_PORT`
//! (default: 9090, 0 disables the exporter).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `frbox_embeddings_total` - Embedding requests (label: outcome)
//! - `frbox_verifications_total` - Verification requests (label: outcome)
//! - `frbox_rejections_total` - Requests rejected by the pipeline (label: reason)
//!
//! ## Histograms
//! - `frbox_request_duration_seconds` - Request duration (labels: endpoint, method, status)
//! - `frbox_detection_duration_seconds` - Detector call duration
//!
//! ## Gauges
//! - `frbox_rate_limit_clients` - Identities currently tracked by the rate limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use frbox::metrics::{init_metrics, record_embedding, record_request_duration};
//!
//! // Initialize metrics (call once at startup)
//! init_metrics(addr)?;
//!
//! // Record metrics in handlers
//! record_embedding("success");
//! record_request_duration("/embedding", "POST", "200", 0.045);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const EMBEDDINGS_TOTAL: &str = "frbox_embeddings_total";
    pub const VERIFICATIONS_TOTAL: &str = "frbox_verifications_total";
    pub const REJECTIONS_TOTAL: &str = "frbox_rejections_total";
    pub const REQUEST_DURATION_SECONDS: &str = "frbox_request_duration_seconds";
    pub const DETECTION_DURATION_SECONDS: &str = "frbox_detection_duration_seconds";
    pub const RATE_LIMIT_CLIENTS: &str = "frbox_rate_limit_clients";
}

/// Pipeline rejection reasons used as the `reason` label.
pub mod reasons {
    pub const AUTH: &str = "auth";
    pub const AUTH_LOCKOUT: &str = "auth_lockout";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const PAYLOAD_SIZE: &str = "payload_size";
}

/// Initialize the Prometheus metrics exporter.
///
/// This sets up metric descriptions and starts the Prometheus HTTP listener
/// on the specified address.
///
/// # Returns
///
/// `Ok(())` if initialization succeeds, `Err` with message otherwise.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::EMBEDDINGS_TOTAL,
        "Total number of embedding requests by outcome"
    );
    describe_counter!(
        names::VERIFICATIONS_TOTAL,
        "Total number of verification requests by outcome"
    );
    describe_counter!(
        names::REJECTIONS_TOTAL,
        "Total number of requests rejected before reaching a handler"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        names::DETECTION_DURATION_SECONDS,
        "Face detector call duration in seconds"
    );

    describe_gauge!(
        names::RATE_LIMIT_CLIENTS,
        "Client identities with an open rate limit window"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record an embedding request outcome (e.g. "success", "no_face_detected").
pub fn record_embedding(outcome: &'static str) {
    counter!(names::EMBEDDINGS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a verification outcome ("match", "no_match" or an error code).
pub fn record_verification(outcome: &'static str) {
    counter!(names::VERIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a request rejected by a pipeline stage.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Record face detector latency.
pub fn record_detection_duration(duration_secs: f64) {
    histogram!(names::DETECTION_DURATION_SECONDS).record(duration_secs);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the number of tracked rate limit windows.
pub fn set_rate_limit_clients(count: usize) {
    gauge!(names::RATE_LIMIT_CLIENTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests verify the functions don't panic.
    // Full metrics testing requires integration tests with a Prometheus scraper.

    #[test]
    fn test_record_counters() {
        // Should not panic even without metrics initialized
        record_embedding("success");
        record_verification("match");
        record_rejection(reasons::RATE_LIMIT);
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("/embedding", "POST", "200", 0.1);
    }

    #[test]
    fn test_record_detection_duration() {
        record_detection_duration(0.25);
    }

    #[test]
    fn test_set_rate_limit_clients() {
        set_rate_limit_clients(0);
        set_rate_limit_clients(42);
    }
}
