//! Embedding verification.
//!
//! # Endpoint
//!
//! - `POST /verify` - Decide whether two embeddings belong to the same face

use axum::Json;
use axum::extract::State;
use tracing::instrument;

use super::util::JsonBody;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::VerifyRequest;
use crate::services::VerificationResult;
use crate::state::AppState;

/// Compare two embeddings.
///
/// # Request Body
///
/// ```json
/// { "embedding_a": [...], "embedding_b": [...], "threshold": 0.85 }
/// ```
///
/// `threshold` is optional and defaults to `SIMILARITY_THRESHOLD`.
///
/// # Response Body
///
/// ```json
/// { "match": true, "confidence": 0.9731 }
/// ```
#[instrument(skip(state, payload), fields(threshold = ?payload.threshold))]
pub async fn verify_embeddings(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<VerifyRequest>,
) -> AppResult<Json<VerificationResult>> {
    let result = state
        .similarity
        .verify(&payload.embedding_a, &payload.embedding_b, payload.threshold)
        .map_err(AppError::from)
        .inspect_err(|e| metrics::record_verification(e.code()))?;

    metrics::record_verification(if result.is_match { "match" } else { "no_match" });

    Ok(Json(result))
}
