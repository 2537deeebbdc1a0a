use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, FaceError};
use crate::metrics;
use crate::validation::DecodedImage;

/// Face bounding box in pixel coordinates of the normalized image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// One face found by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
}

/// The detector could not produce a result.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detector request failed: {0}")]
    Transport(String),

    #[error("Detector returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode image for detector: {0}")]
    Encode(String),
}

impl From<DetectionError> for AppError {
    fn from(err: DetectionError) -> Self {
        AppError::Unexpected(err.to_string())
    }
}

/// Face detection and embedding model.
///
/// Returns every face found in the image along with its embedding. No
/// timeout or retry is applied around this call; dropping the future
/// cancels it.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, image: &DecodedImage) -> Result<Vec<DetectedFace>, DetectionError>;
}

/// Turns validated images into a single face embedding.
///
/// Fails closed: an image with more faces than `max_faces` is rejected
/// rather than picking one of them.
#[derive(Clone)]
pub struct EmbeddingService {
    detector: Arc<dyn FaceDetector>,
    max_faces: usize,
    embedding_dim: usize,
}

impl EmbeddingService {
    pub fn new(detector: Arc<dyn FaceDetector>, max_faces: usize, embedding_dim: usize) -> Self {
        Self {
            detector,
            max_faces,
            embedding_dim,
        }
    }

    pub fn from_config(detector: Arc<dyn FaceDetector>, config: &Config) -> Self {
        Self::new(detector, config.max_faces, config.embedding_dim)
    }

    /// Detect the face in `image` and return its embedding.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn extract_embedding(&self, image: &DecodedImage) -> AppResult<Vec<f32>> {
        let start = Instant::now();
        let detected = self.detector.detect(image).await;
        metrics::record_detection_duration(start.elapsed().as_secs_f64());

        let faces = detected.inspect_err(|e| {
            warn!(error = %e, "Face detector failed");
            metrics::record_embedding("detector_error");
        })?;

        let embedding = self.select_embedding(faces).inspect_err(|e| {
            metrics::record_embedding(e.code());
        })?;

        metrics::record_embedding("success");
        debug!(dim = embedding.len(), "Embedding extracted");

        Ok(embedding)
    }

    fn select_embedding(&self, faces: Vec<DetectedFace>) -> AppResult<Vec<f32>> {
        let count = faces.len();
        if count == 0 {
            return Err(FaceError::NoFaceDetected.into());
        }
        if count > self.max_faces {
            return Err(FaceError::TooManyFaces {
                count,
                max: self.max_faces,
            }
            .into());
        }

        let embedding = faces
            .into_iter()
            .next()
            .map(|face| face.embedding)
            .ok_or(FaceError::NoFaceDetected)?;

        if embedding.len() != self.embedding_dim {
            return Err(FaceError::DimensionMismatch {
                expected: self.embedding_dim,
                actual: embedding.len(),
            }
            .into());
        }

        Ok(embedding)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::ImageKind;
    use image::RgbImage;

    struct FixedDetector {
        faces: usize,
        dim: usize,
    }

    #[async_trait]
    impl FaceDetector for FixedDetector {
        async fn detect(&self, _image: &DecodedImage) -> Result<Vec<DetectedFace>, DetectionError> {
            Ok((0..self.faces)
                .map(|i| DetectedFace {
                    bbox: BoundingBox {
                        top: 0,
                        right: 10,
                        bottom: 10,
                        left: 0,
                    },
                    embedding: vec![i as f32 + 0.5; self.dim],
                })
                .collect())
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl FaceDetector for FailingDetector {
        async fn detect(&self, _image: &DecodedImage) -> Result<Vec<DetectedFace>, DetectionError> {
            Err(DetectionError::Transport("connection refused".to_string()))
        }
    }

    fn image() -> DecodedImage {
        DecodedImage {
            kind: ImageKind::Png,
            original_width: 4,
            original_height: 4,
            pixels: RgbImage::new(4, 4),
        }
    }

    fn service(faces: usize, dim: usize, max_faces: usize) -> EmbeddingService {
        EmbeddingService::new(Arc::new(FixedDetector { faces, dim }), max_faces, 128)
    }

    #[tokio::test]
    async fn test_single_face_returns_embedding() {
        let svc = service(1, 128, 1);
        let embedding = svc.extract_embedding(&image()).await.unwrap();
        assert_eq!(embedding.len(), 128);
    }

    #[tokio::test]
    async fn test_no_face() {
        let err = service(0, 128, 1).extract_embedding(&image()).await.unwrap_err();
        assert!(matches!(err, AppError::Face(FaceError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn test_too_many_faces_fails_closed() {
        let svc = service(2, 128, 1);
        let err = svc.extract_embedding(&image()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Face(FaceError::TooManyFaces { count: 2, max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_faces_within_max_allowed() {
        let embedding = service(2, 128, 2).extract_embedding(&image()).await.unwrap();
        assert_eq!(embedding[0], 0.5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let err = service(1, 64, 1).extract_embedding(&image()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Face(FaceError::DimensionMismatch {
                expected: 128,
                actual: 64
            })
        ));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_detector_failure_is_unexpected() {
        let svc = EmbeddingService::new(Arc::new(FailingDetector), 1, 128);
        let err = svc.extract_embedding(&image()).await.unwrap_err();
        assert!(matches!(err, AppError::Unexpected(_)));
        assert_eq!(err.code(), "internal_error");
    }
}
