//! Core face recognition operations.
//!
//! - [`embedding`]: image → single face embedding via a [`FaceDetector`]
//! - [`similarity`]: embedding pair → match decision
//! - [`detector`]: production [`FaceDetector`] talking to the model server

pub mod detector;
pub mod embedding;
pub mod similarity;

pub use detector::HttpDetector;
pub use embedding::{BoundingBox, DetectedFace, DetectionError, EmbeddingService, FaceDetector};
pub use similarity::{SimilarityEngine, VerificationResult, cosine_similarity};
