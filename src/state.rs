//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Services**: Image validation, embedding extraction, similarity
//! - **Pipeline**: Auth gate and rate limiter used by the middleware
//! - **Configuration**: Immutable runtime configuration
//!
//! Nothing here outlives a request except rate limit windows and auth
//! lockouts; no images or embeddings are retained.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::middleware::rate_limit::{Clock, FixedWindowLimiter, SystemClock, WINDOW};
use crate::middleware::Pipeline;
use crate::services::{EmbeddingService, FaceDetector, SimilarityEngine};
use crate::validation::ImageValidator;

/// How often finished rate limit windows are swept.
pub const EVICTION_INTERVAL: Duration = WINDOW;

/// Shared application state for Axum handlers.
///
/// This struct is cloned for each request handler. All internal data
/// is wrapped in `Arc` or is `Copy`.
///
/// # Lifecycle
///
/// Background tasks are spawned when the state is created, so it must be
/// built inside a Tokio runtime. Call `shutdown()` before dropping:
///
/// ```rust,ignore
/// let state = AppState::new(config, detector);
/// // ... serve ...
/// state.shutdown().await;  // Wait for background tasks to complete
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Decodes and bounds image payloads
    pub validator: ImageValidator,
    /// Face detection and embedding extraction
    pub embedder: EmbeddingService,
    /// Embedding comparison
    pub similarity: SimilarityEngine,
    /// Middleware stages and their shared state
    pub pipeline: Arc<Pipeline>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state using the system clock.
    pub fn new(config: Config, detector: Arc<dyn FaceDetector>) -> Self {
        Self::with_clock(config, detector, Arc::new(SystemClock))
    }

    /// Create application state with an explicit rate limiter clock.
    ///
    /// # Background Tasks
    ///
    /// Spawns the eviction task that sweeps expired rate limit windows and
    /// auth lockouts every [`EVICTION_INTERVAL`].
    pub fn with_clock(config: Config, detector: Arc<dyn FaceDetector>, clock: Arc<dyn Clock>) -> Self {
        let limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit_per_minute, clock));
        let pipeline = Arc::new(Pipeline::from_config(&config, limiter));

        let state = Self {
            validator: ImageValidator::from_config(&config),
            embedder: EmbeddingService::from_config(detector, &config),
            similarity: SimilarityEngine::from_config(&config),
            pipeline,
            config: Arc::new(config),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_eviction_task();

        state
    }

    /// Spawn the background eviction task.
    ///
    /// The task is tracked by `task_tracker` and respects `cancellation_token`
    /// for graceful shutdown. Only the pipeline is cloned into it.
    fn spawn_eviction_task(&self) {
        let pipeline = self.pipeline.clone();
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(EVICTION_INTERVAL);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Eviction task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = pipeline.evict_expired();
                        trace!(evicted, "Expired rate limit windows evicted");
                    }
                }
            }

            debug!("Eviction task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }
}
