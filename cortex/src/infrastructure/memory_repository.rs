// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory repository implementations for development and tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::embedding::VectorEmbedding;
use crate::domain::pattern::{Pattern, PatternId, PatternType};
use crate::domain::repository::{
    CortexRepositories, EmbeddingRepository, PatternRepository, RepositoryError, ThresholdRepository,
};
use crate::domain::threshold::{AdaptiveThreshold, ThresholdKey};

/// In-memory implementation of PatternRepository
pub struct InMemoryPatternRepository {
    patterns: Arc<RwLock<HashMap<PatternId, Pattern>>>,
    embeddings: Option<Arc<InMemoryEmbeddingRepository>>,
}

impl InMemoryPatternRepository {
    pub fn new() -> Self {
        Self {
            patterns: Arc::new(RwLock::new(HashMap::new())),
            embeddings: None,
        }
    }

    /// Also drop the absorbed pattern's embedding when a merge is applied.
    pub fn with_embeddings(mut self, embeddings: Arc<InMemoryEmbeddingRepository>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }
}

impl Default for InMemoryPatternRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternRepository for InMemoryPatternRepository {
    async fn save(&self, pattern: &Pattern) -> Result<(), RepositoryError> {
        let mut patterns = self.patterns.write().await;
        patterns.insert(pattern.id, pattern.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<Pattern>, RepositoryError> {
        let patterns = self.patterns.read().await;
        Ok(patterns.get(&id).cloned())
    }

    async fn find_by_type(&self, pattern_type: PatternType) -> Result<Vec<Pattern>, RepositoryError> {
        let patterns = self.patterns.read().await;
        let mut found: Vec<Pattern> = patterns
            .values()
            .filter(|p| p.pattern_type == pattern_type)
            .cloned()
            .collect();
        found.sort_by_key(|p| (p.created_at, p.id));
        Ok(found)
    }

    async fn list_all(&self) -> Result<Vec<Pattern>, RepositoryError> {
        let patterns = self.patterns.read().await;
        let mut all: Vec<Pattern> = patterns.values().cloned().collect();
        all.sort_by_key(|p| (p.created_at, p.id));
        Ok(all)
    }

    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError> {
        let mut patterns = self.patterns.write().await;
        Ok(patterns.remove(&id).is_some())
    }

    async fn apply_merge(&self, survivor: &Pattern, removed: PatternId) -> Result<(), RepositoryError> {
        {
            let mut patterns = self.patterns.write().await;
            if !patterns.contains_key(&survivor.id) {
                return Err(RepositoryError::NotFound(format!("pattern {}", survivor.id)));
            }
            patterns.insert(survivor.id, survivor.clone());
            patterns.remove(&removed);
        }
        if let Some(embeddings) = &self.embeddings {
            embeddings.delete(removed).await?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.patterns.read().await.len())
    }
}

/// In-memory implementation of EmbeddingRepository
pub struct InMemoryEmbeddingRepository {
    embeddings: Arc<RwLock<HashMap<PatternId, VectorEmbedding>>>,
}

impl InMemoryEmbeddingRepository {
    pub fn new() -> Self {
        Self {
            embeddings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryEmbeddingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingRepository for InMemoryEmbeddingRepository {
    async fn save(&self, embedding: &VectorEmbedding) -> Result<(), RepositoryError> {
        let mut embeddings = self.embeddings.write().await;
        embeddings.insert(embedding.pattern_id, embedding.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PatternId) -> Result<Option<VectorEmbedding>, RepositoryError> {
        Ok(self.embeddings.read().await.get(&id).cloned())
    }

    async fn list_by_model(&self, model: &str) -> Result<Vec<VectorEmbedding>, RepositoryError> {
        let embeddings = self.embeddings.read().await;
        let mut found: Vec<VectorEmbedding> = embeddings
            .values()
            .filter(|e| e.model == model)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.sequence);
        Ok(found)
    }

    async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError> {
        Ok(self.embeddings.write().await.remove(&id).is_some())
    }

    async fn max_sequence(&self) -> Result<u64, RepositoryError> {
        let embeddings = self.embeddings.read().await;
        Ok(embeddings.values().map(|e| e.sequence).max().unwrap_or(0))
    }
}

/// In-memory implementation of ThresholdRepository
pub struct InMemoryThresholdRepository {
    thresholds: Arc<RwLock<HashMap<ThresholdKey, AdaptiveThreshold>>>,
}

impl InMemoryThresholdRepository {
    pub fn new() -> Self {
        Self {
            thresholds: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryThresholdRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThresholdRepository for InMemoryThresholdRepository {
    async fn save(&self, threshold: &AdaptiveThreshold) -> Result<(), RepositoryError> {
        let mut thresholds = self.thresholds.write().await;
        thresholds.insert(threshold.key.clone(), threshold.clone());
        Ok(())
    }

    async fn find(&self, key: &ThresholdKey) -> Result<Option<AdaptiveThreshold>, RepositoryError> {
        Ok(self.thresholds.read().await.get(key).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AdaptiveThreshold>, RepositoryError> {
        let thresholds = self.thresholds.read().await;
        let mut all: Vec<AdaptiveThreshold> = thresholds.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

/// A fresh set of linked in-memory repositories.
pub fn in_memory_repositories() -> CortexRepositories {
    let embeddings = Arc::new(InMemoryEmbeddingRepository::new());
    CortexRepositories {
        patterns: Arc::new(InMemoryPatternRepository::new().with_embeddings(embeddings.clone())),
        embeddings,
        thresholds: Arc::new(InMemoryThresholdRepository::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(name: &str, pattern_type: PatternType) -> Pattern {
        Pattern::new(pattern_type, name, "", vec!["Read".to_string()])
    }

    #[tokio::test]
    async fn test_pattern_crud() {
        let repo = InMemoryPatternRepository::new();
        let p = pattern("Read", PatternType::Coordination);

        repo.save(&p).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.find_by_id(p.id).await.unwrap().unwrap().name, "Read");
        assert_eq!(repo.find_by_type(PatternType::Coordination).await.unwrap().len(), 1);
        assert!(repo.find_by_type(PatternType::Testing).await.unwrap().is_empty());

        assert!(repo.delete(p.id).await.unwrap());
        assert!(!repo.delete(p.id).await.unwrap());
        assert!(repo.find_by_id(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_merge_removes_loser_and_embedding() {
        let repos = in_memory_repositories();
        let survivor = pattern("Read -> Grep", PatternType::Coordination);
        let loser = pattern("read -> grep", PatternType::Coordination);
        repos.patterns.save(&survivor).await.unwrap();
        repos.patterns.save(&loser).await.unwrap();
        repos
            .embeddings
            .save(&VectorEmbedding::new(loser.id, "m", &[1.0, 0.0], false, 1))
            .await
            .unwrap();

        repos.patterns.apply_merge(&survivor, loser.id).await.unwrap();

        assert_eq!(repos.patterns.count().await.unwrap(), 1);
        assert!(repos.embeddings.find_by_id(loser.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embeddings_listed_in_insertion_order() {
        let repo = InMemoryEmbeddingRepository::new();
        let ids: Vec<PatternId> = (0..3).map(|_| PatternId::new()).collect();
        for (seq, id) in ids.iter().enumerate().rev() {
            repo.save(&VectorEmbedding::new(*id, "m", &[0.5], false, seq as u64 + 1))
                .await
                .unwrap();
        }
        repo.save(&VectorEmbedding::new(PatternId::new(), "other", &[0.5], false, 9))
            .await
            .unwrap();

        let listed: Vec<PatternId> = repo.list_by_model("m").await.unwrap().iter().map(|e| e.pattern_id).collect();
        assert_eq!(listed, ids);
        assert_eq!(repo.max_sequence().await.unwrap(), 9);
    }
}
