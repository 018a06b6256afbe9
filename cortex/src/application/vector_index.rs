// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Vector Similarity Index
//!
//! One embedding per pattern id, persisted through an [`EmbeddingRepository`]
//! and optionally quantized to `i8` (see [`crate::domain::embedding`]).
//!
//! ## Search
//!
//! [`VectorIndex::similarity_search`] scans every embedding of the configured
//! model, scores it with the configured [`DistanceMetric`], drops results
//! below `min_similarity` and returns the top `k` by descending similarity.
//! Ties keep insertion order.
//!
//! ## Cache
//!
//! Reconstructed vectors are kept in a bounded LRU cache with a per-entry
//! time-to-live so repeated searches do not dequantize the same rows again.
//! Cache writes happen after the backing store write has succeeded. Every
//! removal bumps a generation counter under the cache lock; a read that
//! loaded rows before the bump does not cache them.
//!
//! ## Dimensions
//!
//! The dimension is fixed by the first vector stored (or found on open) and
//! every later vector or query must match it. A write that fails does not fix
//! the dimension.
//!
//! [`DistanceMetric`]: crate::domain::embedding::DistanceMetric

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::config::VectorConfig;
use crate::domain::embedding::{EmbeddingGenerator, VectorEmbedding};
use crate::domain::error::{CortexError, CortexResult};
use crate::domain::pattern::PatternId;
use crate::domain::repository::EmbeddingRepository;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub pattern_id: PatternId,
    pub similarity: f64,
}

#[derive(Clone)]
struct CachedVector {
    vector: Arc<Vec<f32>>,
    cached_at: Instant,
}

pub struct VectorIndex {
    repository: Arc<dyn EmbeddingRepository>,
    generator: Arc<dyn EmbeddingGenerator>,
    config: VectorConfig,
    /// 0 until the first vector is written.
    dimensions: AtomicUsize,
    next_sequence: AtomicU64,
    cache: Mutex<LruCache<PatternId, CachedVector>>,
    /// Bumped under the cache lock by every removal.
    generation: AtomicU64,
}

impl VectorIndex {
    /// Open an index over `repository`, resuming sequence numbers and the
    /// declared dimension from rows already stored for the configured model.
    pub async fn open(
        repository: Arc<dyn EmbeddingRepository>,
        generator: Arc<dyn EmbeddingGenerator>,
        config: VectorConfig,
    ) -> CortexResult<Self> {
        let max_sequence = repository.max_sequence().await?;
        let dimensions = repository
            .list_by_model(&config.model)
            .await?
            .first()
            .map(|e| e.dims)
            .unwrap_or(0);

        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        debug!(
            model = %config.model,
            dimensions,
            max_sequence,
            "Vector index opened"
        );

        Ok(Self {
            repository,
            generator,
            config,
            dimensions: AtomicUsize::new(dimensions),
            next_sequence: AtomicU64::new(max_sequence + 1),
            cache: Mutex::new(LruCache::new(capacity)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Declared dimension, `None` until the first write.
    pub fn dimensions(&self) -> Option<usize> {
        match self.dimensions.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }

    /// Run the injected generator on `text`.
    pub async fn embed(&self, text: &str) -> CortexResult<Vec<f32>> {
        let vector = self
            .generator
            .generate_embedding(text)
            .await
            .map_err(|e| CortexError::Embedding(e.to_string()))?;

        if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
            return Err(CortexError::Embedding(format!(
                "generator '{}' returned an empty or non-finite vector",
                self.generator.model()
            )));
        }
        Ok(vector)
    }

    pub async fn upsert(&self, pattern_id: PatternId, vector: &[f32]) -> CortexResult<VectorEmbedding> {
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(CortexError::validation("embedding contains non-finite values"));
        }
        self.check_dimensions(vector.len())?;

        let generation = self.generation.load(Ordering::SeqCst);
        let previous = self.repository.find_by_id(pattern_id).await?;
        let sequence = match &previous {
            Some(existing) => existing.sequence,
            None => self.next_sequence.fetch_add(1, Ordering::SeqCst),
        };

        let embedding = VectorEmbedding::new(
            pattern_id,
            self.config.model.clone(),
            vector,
            self.config.compression,
            sequence,
        );
        self.repository.save(&embedding).await?;

        // a concurrent first write of another length may have won
        if let Err(e) = self.claim_dimensions(vector.len()) {
            match &previous {
                Some(existing) => self.repository.save(existing).await?,
                None => {
                    self.repository.delete(pattern_id).await?;
                }
            }
            return Err(e);
        }

        self.cache_if_current(pattern_id, Arc::new(embedding.to_vector()), generation);
        Ok(embedding)
    }

    /// Embed `text` and store it for `pattern_id`.
    pub async fn index_text(&self, pattern_id: PatternId, text: &str) -> CortexResult<VectorEmbedding> {
        let vector = self.embed(text).await?;
        self.upsert(pattern_id, &vector).await
    }

    pub async fn get(&self, pattern_id: PatternId) -> CortexResult<Option<Vec<f32>>> {
        if let Some(hit) = self.cached(pattern_id) {
            return Ok(Some(hit.as_ref().clone()));
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let stored = self.repository.find_by_id(pattern_id).await?;
        Ok(stored.map(|e| {
            let vector = e.to_vector();
            self.cache_if_current(pattern_id, Arc::new(vector.clone()), generation);
            vector
        }))
    }

    pub async fn remove(&self, pattern_id: PatternId) -> CortexResult<bool> {
        let removed = self.repository.delete(pattern_id).await?;
        self.evict(pattern_id);
        Ok(removed)
    }

    /// Drop a cached vector without touching the store.
    pub fn evict(&self, pattern_id: PatternId) {
        let mut cache = self.cache.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        cache.pop(&pattern_id);
    }

    pub async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> CortexResult<Vec<SimilarityMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(dims) = self.dimensions() {
            if query.len() != dims {
                return Err(CortexError::validation(format!(
                    "query has {} dimensions, index expects {}",
                    query.len(),
                    dims
                )));
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let embeddings = self.repository.list_by_model(&self.config.model).await?;
        let mut scored: Vec<(SimilarityMatch, u64)> = Vec::with_capacity(embeddings.len());

        for embedding in embeddings {
            let vector = match self.cached(embedding.pattern_id) {
                Some(hit) => hit,
                None => {
                    let vector = Arc::new(embedding.to_vector());
                    self.cache_if_current(embedding.pattern_id, vector.clone(), generation);
                    vector
                }
            };

            let similarity = self.config.distance.similarity(query, &vector);
            if similarity.is_finite() && similarity >= min_similarity {
                scored.push((
                    SimilarityMatch {
                        pattern_id: embedding.pattern_id,
                        similarity,
                    },
                    embedding.sequence,
                ));
            }
        }

        scored.sort_by(|a, b| {
            b.0.similarity
                .partial_cmp(&a.0.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        Ok(scored.into_iter().take(k).map(|(m, _)| m).collect())
    }

    /// Embed `text` and search with it.
    pub async fn search_text(&self, text: &str, k: usize, min_similarity: f64) -> CortexResult<Vec<SimilarityMatch>> {
        let query = self.embed(text).await?;
        self.similarity_search(&query, k, min_similarity).await
    }

    /// Fails when `len` cannot be stored. Does not fix the dimension.
    fn check_dimensions(&self, len: usize) -> CortexResult<()> {
        if len == 0 {
            return Err(CortexError::validation("embedding cannot be empty"));
        }
        match self.dimensions.load(Ordering::Acquire) {
            0 => Ok(()),
            existing if existing == len => Ok(()),
            existing => Err(dimension_mismatch(len, existing)),
        }
    }

    fn claim_dimensions(&self, len: usize) -> CortexResult<()> {
        match self
            .dimensions
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(existing) if existing == len => Ok(()),
            Err(existing) => Err(dimension_mismatch(len, existing)),
        }
    }

    fn cached(&self, pattern_id: PatternId) -> Option<Arc<Vec<f32>>> {
        let ttl = self.config.cache_ttl();
        let mut cache = self.cache.lock();
        match cache.get(&pattern_id) {
            Some(entry) if entry.cached_at.elapsed() <= ttl => return Some(entry.vector.clone()),
            Some(_) => {}
            None => return None,
        }
        cache.pop(&pattern_id);
        None
    }

    /// Cache `vector` unless something was removed since `generation` was
    /// read. Otherwise any older entry for `pattern_id` is dropped too.
    fn cache_if_current(&self, pattern_id: PatternId, vector: Arc<Vec<f32>>, generation: u64) {
        let mut cache = self.cache.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            cache.pop(&pattern_id);
            return;
        }
        cache.put(
            pattern_id,
            CachedVector {
                vector,
                cached_at: Instant::now(),
            },
        );
    }
}

fn dimension_mismatch(len: usize, existing: usize) -> CortexError {
    CortexError::validation(format!(
        "embedding has {} dimensions, index is fixed at {}",
        len, existing
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::embedding::DistanceMetric;
    use crate::infrastructure::embedding_client::HashingEmbeddingClient;
    use crate::domain::repository::RepositoryError;
    use crate::infrastructure::memory_repository::InMemoryEmbeddingRepository;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    async fn index(config: VectorConfig) -> VectorIndex {
        VectorIndex::open(
            Arc::new(InMemoryEmbeddingRepository::new()),
            Arc::new(HashingEmbeddingClient::new(config.model.clone(), config.dimensions)),
            config,
        )
        .await
        .unwrap()
    }

    fn config() -> VectorConfig {
        VectorConfig {
            dimensions: 3,
            ..VectorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_then_insertion() {
        let index = index(config()).await;
        let a = PatternId::new();
        let b = PatternId::new();
        let c = PatternId::new();

        index.upsert(a, &[1.0, 0.0, 0.0]).await.unwrap();
        index.upsert(b, &[0.0, 1.0, 0.0]).await.unwrap();
        index.upsert(c, &[1.0, 0.0, 0.0]).await.unwrap();

        let results = index.similarity_search(&[1.0, 0.0, 0.0], 10, 0.5).await.unwrap();
        let ids: Vec<PatternId> = results.iter().map(|m| m.pattern_id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(results.iter().all(|m| (m.similarity - 1.0).abs() < 0.01));

        let top = index.similarity_search(&[0.0, 1.0, 0.0], 1, -1.0).await.unwrap();
        assert_eq!(top[0].pattern_id, b);
    }

    #[tokio::test]
    async fn test_dimension_is_fixed_after_first_write() {
        let index = index(config()).await;
        assert_eq!(index.dimensions(), None);
        index.upsert(PatternId::new(), &[0.1, 0.2, 0.3]).await.unwrap();
        assert_eq!(index.dimensions(), Some(3));

        let err = index.upsert(PatternId::new(), &[0.1, 0.2]).await.unwrap_err();
        assert!(matches!(err, CortexError::Validation(_)));
        assert!(index.similarity_search(&[0.1, 0.2], 3, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_and_cache() {
        let index = index(config()).await;
        let id = PatternId::new();
        index.upsert(id, &[0.3, 0.3, 0.9]).await.unwrap();
        assert_eq!(index.cached_entries(), 1);

        let stored = index.get(id).await.unwrap().unwrap();
        assert_eq!(stored.len(), 3);

        assert!(index.remove(id).await.unwrap());
        assert_eq!(index.cached_entries(), 0);
        assert!(index.get(id).await.unwrap().is_none());
        assert!(!index.remove(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let index = index(VectorConfig {
            cache_capacity: 2,
            ..config()
        })
        .await;
        for i in 0..5 {
            index.upsert(PatternId::new(), &[i as f32, 1.0, 0.0]).await.unwrap();
        }
        assert_eq!(index.cached_entries(), 2);
        assert_eq!(index.similarity_search(&[1.0, 1.0, 0.0], 10, -1.0).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_reopen_resumes_sequence_and_dimensions() {
        let repo: Arc<dyn EmbeddingRepository> = Arc::new(InMemoryEmbeddingRepository::new());
        let generator = Arc::new(HashingEmbeddingClient::new("cortex-hash-v1", 3));

        let first = VectorIndex::open(repo.clone(), generator.clone(), config()).await.unwrap();
        let a = PatternId::new();
        first.upsert(a, &[1.0, 0.0, 0.0]).await.unwrap();

        let second = VectorIndex::open(repo.clone(), generator, config()).await.unwrap();
        assert_eq!(second.dimensions(), Some(3));
        let b = PatternId::new();
        let stored = second.upsert(b, &[1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(stored.sequence, 2);

        let ids: Vec<PatternId> = second
            .similarity_search(&[1.0, 0.0, 0.0], 2, 0.0)
            .await
            .unwrap()
            .iter()
            .map(|m| m.pattern_id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn test_euclidean_metric() {
        let index = index(VectorConfig {
            distance: DistanceMetric::Euclidean,
            compression: false,
            ..config()
        })
        .await;
        let near = PatternId::new();
        let far = PatternId::new();
        index.upsert(far, &[5.0, 5.0, 5.0]).await.unwrap();
        index.upsert(near, &[1.0, 0.0, 0.0]).await.unwrap();

        let results = index.similarity_search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(results[0].pattern_id, near);
        assert_eq!(results[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn test_text_search_uses_generator() {
        let index = index(VectorConfig::default()).await;
        let id = PatternId::new();
        index.index_text(id, "read then grep").await.unwrap();
        let results = index.search_text("read then grep", 1, 0.9).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pattern_id, id);
    }

    /// In-memory embeddings that can refuse writes or pause a listing.
    #[derive(Default)]
    struct ScriptedEmbeddings {
        inner: InMemoryEmbeddingRepository,
        fail_saves: AtomicBool,
        hold_listing: AtomicBool,
        listed: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EmbeddingRepository for ScriptedEmbeddings {
        async fn save(&self, embedding: &VectorEmbedding) -> Result<(), RepositoryError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(RepositoryError::Database("disk full".to_string()));
            }
            self.inner.save(embedding).await
        }

        async fn find_by_id(&self, id: PatternId) -> Result<Option<VectorEmbedding>, RepositoryError> {
            self.inner.find_by_id(id).await
        }

        async fn list_by_model(&self, model: &str) -> Result<Vec<VectorEmbedding>, RepositoryError> {
            let rows = self.inner.list_by_model(model).await?;
            if self.hold_listing.swap(false, Ordering::SeqCst) {
                self.listed.notify_one();
                self.release.notified().await;
            }
            Ok(rows)
        }

        async fn delete(&self, id: PatternId) -> Result<bool, RepositoryError> {
            self.inner.delete(id).await
        }

        async fn max_sequence(&self) -> Result<u64, RepositoryError> {
            self.inner.max_sequence().await
        }
    }

    async fn scripted_index() -> (Arc<ScriptedEmbeddings>, Arc<VectorIndex>) {
        let repo = Arc::new(ScriptedEmbeddings::default());
        let index = VectorIndex::open(
            repo.clone(),
            Arc::new(HashingEmbeddingClient::new("cortex-hash-v1", 3)),
            config(),
        )
        .await
        .unwrap();
        (repo, Arc::new(index))
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_dimension_open() {
        let (repo, index) = scripted_index().await;
        repo.fail_saves.store(true, Ordering::SeqCst);

        let err = index.upsert(PatternId::new(), &[1.0, 0.0]).await.unwrap_err();
        assert!(matches!(err, CortexError::Storage(_)));
        assert_eq!(index.dimensions(), None);
        assert_eq!(index.cached_entries(), 0);

        repo.fail_saves.store(false, Ordering::SeqCst);
        index.upsert(PatternId::new(), &[1.0, 0.0, 0.0]).await.unwrap();
        assert_eq!(index.dimensions(), Some(3));
    }

    #[tokio::test]
    async fn test_search_does_not_recache_removed_vector() {
        let (repo, index) = scripted_index().await;
        let id = PatternId::new();
        index.upsert(id, &[1.0, 0.0, 0.0]).await.unwrap();
        index.evict(id);
        assert_eq!(index.cached_entries(), 0);

        repo.hold_listing.store(true, Ordering::SeqCst);
        let search = {
            let index = index.clone();
            tokio::spawn(async move { index.similarity_search(&[1.0, 0.0, 0.0], 1, 0.0).await })
        };
        // the search has loaded the row and is paused before caching it
        repo.listed.notified().await;
        assert!(index.remove(id).await.unwrap());
        repo.release.notify_one();

        let found = search.await.unwrap().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(index.cached_entries(), 0);
        assert!(index.get(id).await.unwrap().is_none());
    }
}
