//! Face embedding extraction.
//!
//! # Endpoint
//!
//! - `POST /embedding` - Return the embedding of the single face in an image
//!
//! Decoding and resizing run on the blocking pool; the detector call is
//! awaited directly so a client disconnect cancels it.

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use super::util::JsonBody;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{EmbeddingRequest, EmbeddingResponse};
use crate::state::AppState;

/// Extract a face embedding.
///
/// # Request Body
///
/// ```json
/// { "image_data": "data:image/jpeg;base64,/9j/4AAQ..." }
/// ```
///
/// # Response Body
///
/// ```json
/// { "embedding": [0.012, -0.094, ...], "dim": 128 }
/// ```
#[instrument(skip(state, payload), fields(payload_len = payload.image_data.len()))]
pub async fn create_embedding(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<EmbeddingRequest>,
) -> AppResult<Json<EmbeddingResponse>> {
    let validator = state.validator;
    let image = tokio::task::spawn_blocking(move || validator.validate(&payload.image_data))
        .await
        .map_err(|e| AppError::Unexpected(format!("Image decode task failed: {e}")))?
        .map_err(AppError::from)
        .inspect_err(|e| metrics::record_embedding(e.code()))?;

    tracing::debug!(
        format = %image.kind,
        width = image.width(),
        height = image.height(),
        resized = image.was_resized(),
        "Image accepted"
    );

    let embedding = state.embedder.extract_embedding(&image).await?;

    Ok(Json(EmbeddingResponse::new(embedding)))
}
