use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use frbox::{AppState, Config, HttpDetector, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration comes first so RUST_LOG from .env reaches the filter
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting FRbox v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        max_image_size = config.max_image_size,
        max_image_width = config.max_image_width,
        embedding_dim = config.embedding_dim,
        threshold = config.similarity_threshold,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let detector = HttpDetector::new(&config.detector_url).map_err(|e| {
        error!("Failed to create detector client: {e}");
        exitcode::SOFTWARE
    })?;
    info!(url = %config.detector_url, "Face detector client ready");

    // Build application state and router
    let state = AppState::new(config.clone(), Arc::new(detector));
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  POST /embedding     - Extract a face embedding");
    info!("  POST /verify        - Compare two embeddings");
    info!("  GET  /health        - Health check");
    info!("  GET  /openapi.json  - API description");

    // Peer addresses feed rate limiting when no trusted proxy is involved
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
