// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Repository Interfaces
//!
//! Persistence contracts for the three aggregates the engine owns, defined in
//! the domain layer and implemented in `crate::infrastructure`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `PatternRepository` | `Pattern` | `InMemoryPatternRepository`, `SqliteCortexStore` |
//! | `EmbeddingRepository` | `VectorEmbedding` | `InMemoryEmbeddingRepository`, `SqliteCortexStore` |
//! | `ThresholdRepository` | `AdaptiveThreshold` | `InMemoryThresholdRepository`, `SqliteCortexStore` |
//!
//! Repositories are plain storage: deduplication, locking and ranking live in
//! the application services that wrap them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::embedding::VectorEmbedding;
use crate::domain::pattern::{Pattern, PatternId, PatternType};
use crate::domain::threshold::{AdaptiveThreshold, ThresholdKey};

#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Save pattern (create or update)
    async fn save(&self, pattern: &Pattern) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>, RepositoryError>;

    async fn find_by_type(&self, pattern_type: PatternType) -> Result<Vec<Pattern>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Pattern>, RepositoryError>;

    /// Delete pattern by ID. Returns whether a row was removed.
    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError>;

    /// Persist a merge decision as one unit: the survivor is written and the
    /// absorbed pattern (and its embedding, where the backend stores both) removed.
    async fn apply_merge(&self, survivor: &Pattern, removed: PatternId) -> Result<(), RepositoryError>;

    async fn count(&self) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    async fn save(&self, embedding: &VectorEmbedding) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PatternId) -> Result<Option<VectorEmbedding>, RepositoryError>;

    /// All embeddings written by `model`, in insertion order.
    async fn list_by_model(&self, model: &str) -> Result<Vec<VectorEmbedding>, RepositoryError>;

    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError>;

    /// Highest insertion sequence number stored so far (0 when empty).
    async fn max_sequence(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ThresholdRepository: Send + Sync {
    async fn save(&self, threshold: &AdaptiveThreshold) -> Result<(), RepositoryError>;

    async fn find(&self, key: &ThresholdKey) -> Result<Option<AdaptiveThreshold>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<AdaptiveThreshold>, RepositoryError>;
}

/// Bundle of the repositories one engine instance owns.
#[derive(Clone)]
pub struct CortexRepositories {
    pub patterns: Arc<dyn PatternRepository>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub thresholds: Arc<dyn ThresholdRepository>,
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<bincode::Error> for RepositoryError {
    fn from(err: bincode::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
