// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedding Client
//!
//! Deterministic feature-hashing embedding generator.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Default [`EmbeddingGenerator`] for development and tests
//!
//! Text is lowercased and split on non-alphanumeric characters. Every unigram
//! and adjacent bigram is hashed with BLAKE3 into a signed bucket, and the
//! resulting vector is L2-normalised. Texts sharing vocabulary land close
//! under cosine similarity; identical texts embed identically.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::embedding::EmbeddingGenerator;

/// Client for generating embeddings
pub struct HashingEmbeddingClient {
    model: String,
    dimensions: usize,
}

impl HashingEmbeddingClient {
    pub fn new(model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            model: model.into(),
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut index = [0u8; 8];
        index.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(index) % self.dimensions as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (slot, sign)
    }
}

impl Default for HashingEmbeddingClient {
    fn default() -> Self {
        Self::new("cortex-hash-v1", 256)
    }
}

#[async_trait]
impl EmbeddingGenerator for HashingEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        if tokens.is_empty() {
            anyhow::bail!("cannot embed text without any word characters");
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in &tokens {
            let (slot, sign) = self.bucket(token);
            embedding[slot] += sign;
        }
        for pair in tokens.windows(2) {
            let (slot, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            embedding[slot] += sign * 0.5;
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in embedding.iter_mut() {
                *v /= norm;
            }
        }

        Ok(embedding)
    }
}
