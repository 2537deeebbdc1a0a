use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::ShapeError;

/// Outcome of comparing two embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationResult {
    #[serde(rename = "match")]
    pub is_match: bool,
    /// Cosine similarity clamped to [0, 1].
    pub confidence: f64,
}

/// Match decisions over fixed-length embeddings.
///
/// Pure and stateless: the same inputs always give the same result, and
/// swapping `a` and `b` never changes it.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityEngine {
    dim: usize,
    default_threshold: f64,
}

impl SimilarityEngine {
    pub fn new(dim: usize, default_threshold: f64) -> Self {
        Self {
            dim,
            default_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.embedding_dim, config.similarity_threshold)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Compare two embeddings against `threshold` (or the configured default).
    ///
    /// Checks run in order: lengths, threshold range, zero magnitude.
    pub fn verify(
        &self,
        a: &[f32],
        b: &[f32],
        threshold: Option<f64>,
    ) -> Result<VerificationResult, ShapeError> {
        if a.len() != self.dim || b.len() != self.dim {
            return Err(ShapeError::LengthMismatch {
                expected: self.dim,
                left: a.len(),
                right: b.len(),
            });
        }

        let threshold = threshold.unwrap_or(self.default_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ShapeError::InvalidThreshold(threshold));
        }

        let confidence = cosine_similarity(a, b)?.clamp(0.0, 1.0);
        let is_match = confidence >= threshold;

        debug!(confidence, threshold, is_match, "Embeddings compared");

        Ok(VerificationResult {
            is_match,
            confidence,
        })
    }
}

/// Cosine similarity of two equal-length vectors, accumulated in f64.
///
/// Returns a value in [-1, 1]. Callers must pass slices of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ShapeError> {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(ShapeError::DegenerateVector);
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !cos.is_finite() {
        return Err(ShapeError::DegenerateVector);
    }
    // Rounding can push |cos| slightly past 1
    Ok(cos.clamp(-1.0, 1.0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const DIM: usize = 128;

    fn engine() -> SimilarityEngine {
        SimilarityEngine::new(DIM, 0.85)
    }

    fn vector(seed: u32) -> Vec<f32> {
        (0..DIM as u32)
            .map(|i| (((i + 1) * (seed + 7)) % 31) as f32 / 31.0 - 0.4)
            .collect()
    }

    #[test]
    fn test_self_similarity_is_one() {
        for seed in 0..10 {
            let v = vector(seed);
            let result = engine().verify(&v, &v, None).unwrap();
            assert!((result.confidence - 1.0).abs() < 1e-6);
            assert!(result.is_match);
        }
    }

    #[test]
    fn test_symmetric() {
        for seed in 0..10 {
            let (a, b) = (vector(seed), vector(seed + 3));
            let ab = engine().verify(&a, &b, Some(0.5)).unwrap();
            let ba = engine().verify(&b, &a, Some(0.5)).unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_confidence_in_unit_range() {
        for seed in 0..20 {
            let result = engine().verify(&vector(seed), &vector(seed * 5 + 1), None).unwrap();
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }

    #[test]
    fn test_opposite_vectors_clamp_to_zero() {
        let a = vector(1);
        let b: Vec<f32> = a.iter().map(|x| -x).collect();
        let result = engine().verify(&a, &b, Some(0.0)).unwrap();
        assert_eq!(result.confidence, 0.0);
        // threshold 0 still matches at confidence 0
        assert!(result.is_match);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let mut a = vec![0.0f32; DIM];
        let mut b = vec![0.0f32; DIM];
        a[0] = 1.0;
        b[1] = 1.0;
        let result = engine().verify(&a, &b, None).unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_match);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let engine = SimilarityEngine::new(2, 0.85);
        let v = [3.0f32, 4.0];
        let result = engine.verify(&v, &v, Some(1.0)).unwrap();
        assert_eq!(result.confidence, 1.0);
        assert!(result.is_match);
    }

    #[test]
    fn test_length_mismatch() {
        let err = engine().verify(&vector(1), &vector(1)[..64], None).unwrap_err();
        assert_eq!(
            err,
            ShapeError::LengthMismatch {
                expected: DIM,
                left: DIM,
                right: 64
            }
        );
    }

    #[test]
    fn test_equal_lengths_but_wrong_dimension() {
        let a = vec![1.0f32; 3];
        let err = engine().verify(&a, &a, None).unwrap_err();
        assert!(matches!(err, ShapeError::LengthMismatch { expected: DIM, .. }));
    }

    #[test]
    fn test_zero_vector_is_degenerate() {
        let zero = vec![0.0f32; DIM];
        assert_eq!(
            engine().verify(&zero, &vector(2), None).unwrap_err(),
            ShapeError::DegenerateVector
        );
        assert_eq!(
            engine().verify(&vector(2), &zero, None).unwrap_err(),
            ShapeError::DegenerateVector
        );
    }

    #[test]
    fn test_non_finite_components_are_degenerate() {
        let mut a = vector(3);
        a[0] = f32::INFINITY;
        assert_eq!(
            engine().verify(&a, &vector(3), None).unwrap_err(),
            ShapeError::DegenerateVector
        );
    }

    #[test]
    fn test_invalid_threshold() {
        let v = vector(0);
        assert_eq!(
            engine().verify(&v, &v, Some(1.5)).unwrap_err(),
            ShapeError::InvalidThreshold(1.5)
        );
        assert!(engine().verify(&v, &v, Some(-0.01)).is_err());
    }

    #[test]
    fn test_length_checked_before_threshold() {
        let err = engine().verify(&[1.0], &[1.0, 2.0], Some(7.0)).unwrap_err();
        assert!(matches!(err, ShapeError::LengthMismatch { .. }));
    }

    #[test]
    fn test_default_threshold_used() {
        let strict = SimilarityEngine::new(2, 0.99);
        let lenient = SimilarityEngine::new(2, 0.5);
        let (a, b) = ([1.0f32, 0.0], [1.0f32, 1.0]);
        // cos = 1/sqrt(2) ~ 0.707
        assert!(!strict.verify(&a, &b, None).unwrap().is_match);
        assert!(lenient.verify(&a, &b, None).unwrap().is_match);
    }

    #[test]
    fn test_serializes_match_field() {
        let json = serde_json::to_value(VerificationResult {
            is_match: true,
            confidence: 0.9,
        })
        .unwrap();
        assert_eq!(json["match"], true);
        assert_eq!(json["confidence"], 0.9);
    }
}
