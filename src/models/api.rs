use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to extract a face embedding from an image.
#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    /// Base64 image, optionally as a `data:image/...;base64,` URL
    pub image_data: String,
}

/// Embedding of the single face found in the image.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    /// Always equal to `embedding.len()`
    pub dim: usize,
}

impl EmbeddingResponse {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            dim: embedding.len(),
            embedding,
        }
    }
}

/// Request to compare two embeddings.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub embedding_a: Vec<f32>,
    pub embedding_b: Vec<f32>,
    /// Match threshold in [0, 1]; the configured default when omitted
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process is serving
    pub status: String,
    pub service: String,
    /// Application version
    pub version: String,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}
