// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Vector Embeddings
//!
//! Embeddings are opaque fixed-length vectors produced by an injected
//! [`EmbeddingGenerator`]; the engine never trains the generator. Each
//! embedding belongs to exactly one pattern and is deleted with it.
//!
//! ## Quantization
//!
//! When compression is enabled a vector is stored as `i8` values through a
//! per-vector affine map from `[min, max]` onto `[-127, 127]`. The `(min, max)`
//! pair is persisted next to the bytes so [`dequantize`] can invert the map.
//! A constant vector (`min == max`) quantizes to all zeros and dequantizes
//! back to the constant.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::pattern::PatternId;

const QUANT_LEVELS: f32 = 254.0;
const QUANT_OFFSET: f32 = 127.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmbeddingPayload {
    Raw(Vec<f32>),
    Quantized { values: Vec<i8>, min: f32, max: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEmbedding {
    pub pattern_id: PatternId,
    pub model: String,
    pub dims: usize,
    pub payload: EmbeddingPayload,
    /// Insertion order, used as the stable tie-break in searches.
    pub sequence: u64,
}

impl VectorEmbedding {
    pub fn new(pattern_id: PatternId, model: impl Into<String>, vector: &[f32], compress: bool, sequence: u64) -> Self {
        let payload = if compress {
            let (values, min, max) = quantize(vector);
            EmbeddingPayload::Quantized { values, min, max }
        } else {
            EmbeddingPayload::Raw(vector.to_vec())
        };
        Self {
            pattern_id,
            model: model.into(),
            dims: vector.len(),
            payload,
            sequence,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.payload, EmbeddingPayload::Quantized { .. })
    }

    /// Reconstruct the float vector (lossy when quantized).
    pub fn to_vector(&self) -> Vec<f32> {
        match &self.payload {
            EmbeddingPayload::Raw(values) => values.clone(),
            EmbeddingPayload::Quantized { values, min, max } => dequantize(values, *min, *max),
        }
    }
}

/// Quantize to `i8`, returning the values and the `(min, max)` range.
pub fn quantize(vector: &[f32]) -> (Vec<i8>, f32, f32) {
    if vector.is_empty() {
        return (Vec::new(), 0.0, 0.0);
    }
    let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
    let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    let values = if range > 0.0 && range.is_finite() {
        vector
            .iter()
            .map(|v| {
                let scaled = (v - min) / range * QUANT_LEVELS - QUANT_OFFSET;
                scaled.round().clamp(-QUANT_OFFSET, QUANT_OFFSET) as i8
            })
            .collect()
    } else {
        vec![0; vector.len()]
    };

    (values, min, max)
}

pub fn dequantize(values: &[i8], min: f32, max: f32) -> Vec<f32> {
    let range = max - min;
    if !(range > 0.0 && range.is_finite()) {
        return vec![min; values.len()];
    }
    values
        .iter()
        .map(|q| min + (*q as f32 + QUANT_OFFSET) / QUANT_LEVELS * range)
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let magnitude_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let magnitude_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x - *y) as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    /// Similarity in "higher is closer" form: cosine as is, Euclidean as `1 / (1 + d)`.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Euclidean => 1.0 / (1.0 + euclidean_distance(a, b)),
        }
    }
}

/// Source of embeddings for text.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Model identifier stored with every embedding.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn generate_embedding(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vector(rng: &mut StdRng, dims: usize) -> Vec<f32> {
        (0..dims).map(|_| rng.random_range(-1.0f32..1.0f32)).collect()
    }

    #[test]
    fn test_quantize_range_and_bounds() {
        let (values, min, max) = quantize(&[-2.0, 0.0, 2.0]);
        assert_eq!(min, -2.0);
        assert_eq!(max, 2.0);
        assert_eq!(values, vec![-127, 0, 127]);
        assert_eq!(dequantize(&values, min, max), vec![-2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_constant_vector() {
        let (values, min, max) = quantize(&[0.5, 0.5, 0.5]);
        assert_eq!(values, vec![0, 0, 0]);
        assert_eq!(dequantize(&values, min, max), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_quantization_preserves_cosine() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let a = random_vector(&mut rng, 128);
            let b = random_vector(&mut rng, 128);
            let exact = cosine_similarity(&a, &b);

            let (qa, amin, amax) = quantize(&a);
            let (qb, bmin, bmax) = quantize(&b);
            let approx = cosine_similarity(&dequantize(&qa, amin, amax), &dequantize(&qb, bmin, bmax));

            assert!((exact - approx).abs() < 0.01, "exact={} approx={}", exact, approx);
        }
    }

    #[test]
    fn test_similarity_metrics() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0]), 0.0);
        assert_eq!(DistanceMetric::Euclidean.similarity(&a, &a), 1.0);
        assert!((DistanceMetric::Euclidean.similarity(&a, &b) - 1.0 / (1.0 + 2f64.sqrt())).abs() < 1e-9);
    }

    #[test]
    fn test_embedding_payloads() {
        let id = PatternId::new();
        let raw = VectorEmbedding::new(id, "m", &[0.1, 0.2], false, 1);
        assert!(!raw.is_compressed());
        assert_eq!(raw.to_vector(), vec![0.1, 0.2]);

        let packed = VectorEmbedding::new(id, "m", &[0.1, 0.2, 0.3], true, 2);
        assert!(packed.is_compressed());
        assert_eq!(packed.dims, 3);
        for (x, y) in packed.to_vector().iter().zip([0.1f32, 0.2, 0.3]) {
            assert!((x - y).abs() < 0.002);
        }
    }
}
