//! # FRbox
//!
//! Stateless face embedding and verification over HTTP:
//!
//! - **Embedding**: base64 image in, one fixed-length face embedding out
//! - **Verification**: cosine similarity of two embeddings against a threshold
//! - **Security**: API key authentication, fixed-window rate limiting,
//!   payload limits, hardened response headers
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! No images or embeddings are stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Trace → Pipeline (auth, rate, size) → CORS    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (embedding, verify, health, docs)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ImageValidator · EmbeddingService · SimilarityEngine       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FaceDetector (HttpDetector → external model server)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use frbox::{AppState, Config, HttpDetector, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let detector = HttpDetector::new(&config.detector_url)?;
//!
//!     let state = AppState::new(config, Arc::new(detector));
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Enable API key authentication:
//! ```bash
//! API_KEYS=key-one,key-two cargo run
//! ```
//!
//! Change the per-client limit (0 disables it):
//! ```bash
//! RATE_LIMIT_PER_MINUTE=120 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use services::{FaceDetector, HttpDetector};
pub use state::AppState;
