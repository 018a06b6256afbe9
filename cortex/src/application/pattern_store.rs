// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Store
//!
//! Keyed storage for [`Pattern`]s with merge-on-similarity and a three-phase
//! consolidation pass. This is the only component that mutates patterns.
//!
//! ## Deduplication
//!
//! [`PatternStore::store`] merges the incoming pattern into the most similar
//! existing pattern of the same type when their canonical names reach
//! `merge_similarity` (default 0.95). Counts are summed, confidence becomes
//! the usage-weighted mean and the newer `last_used` is kept.
//!
//! ## Consolidation
//!
//! | Phase | Effect |
//! |-------|--------|
//! | merge | pairwise-merge duplicates until none remain; the more-used pattern survives |
//! | prune | delete patterns with `confidence < 0.3`, `usage < 10` and `age > 30d` |
//! | decay | multiply confidence by `decay_factor` for patterns idle longer than `decay_idle_days` |
//!
//! Consolidation works from a point-in-time snapshot of ids and re-reads each
//! row under its lock right before mutating it. It never holds a row lock for
//! longer than one decision, and it checks the cancellation token between
//! decisions, so an interrupted pass leaves every pattern either fully merged
//! or untouched.
//!
//! ## Locking
//!
//! Every mutation of a row happens under that row's async mutex. Merges lock
//! both rows in id order. `store` additionally serializes the
//! find-duplicate-then-insert step behind a store-wide gate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::vector_index::VectorIndex;
use crate::domain::config::StoreConfig;
use crate::domain::error::{CortexError, CortexResult};
use crate::domain::events::{LearningEvent, LearningObserver};
use crate::domain::pattern::{name_similarity, Pattern, PatternId, PatternType};
use crate::domain::repository::PatternRepository;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternFilter {
    pub pattern_type: Option<PatternType>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
}

impl PatternFilter {
    pub fn of_type(pattern_type: PatternType) -> Self {
        Self {
            pattern_type: Some(pattern_type),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StoreOutcome {
    Inserted { id: PatternId },
    Merged { into: PatternId },
}

impl StoreOutcome {
    /// Id of the surviving pattern.
    pub fn pattern_id(&self) -> PatternId {
        match self {
            StoreOutcome::Inserted { id } => *id,
            StoreOutcome::Merged { into } => *into,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, StoreOutcome::Merged { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOptions {
    pub merge: bool,
    pub prune: bool,
    pub decay: bool,
    /// Reference time for age and idle computations; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for ConsolidationOptions {
    fn default() -> Self {
        Self {
            merge: true,
            prune: true,
            decay: true,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub merged: usize,
    pub pruned: usize,
    pub decayed: usize,
    pub interrupted: bool,
    pub duration_ms: u64,
}

pub struct PatternStore {
    repository: Arc<dyn PatternRepository>,
    vectors: Option<Arc<VectorIndex>>,
    observer: Option<Arc<dyn LearningObserver>>,
    config: StoreConfig,
    row_locks: DashMap<PatternId, Arc<Mutex<()>>>,
    write_gate: Mutex<()>,
}

impl PatternStore {
    pub fn new(repository: Arc<dyn PatternRepository>, config: StoreConfig) -> Self {
        Self {
            repository,
            vectors: None,
            observer: None,
            config,
            row_locks: DashMap::new(),
            write_gate: Mutex::new(()),
        }
    }

    /// Keep pattern embeddings in step with inserts, merges and prunes.
    pub fn with_vector_index(mut self, vectors: Arc<VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LearningObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn row_lock(&self, id: PatternId) -> Arc<Mutex<()>> {
        self.row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: LearningEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Insert `pattern`, or merge it into an existing near-duplicate.
    pub async fn store(&self, pattern: Pattern) -> CortexResult<StoreOutcome> {
        pattern.validate()?;

        let _gate = self.write_gate.lock().await;

        let canonical = pattern.canonical_name();
        let mut best: Option<(PatternId, f64)> = None;
        for existing in self.repository.find_by_type(pattern.pattern_type).await? {
            if existing.id == pattern.id {
                continue;
            }
            let similarity = name_similarity(&existing.canonical_name(), &canonical);
            if similarity >= self.config.merge_similarity
                && best.map_or(true, |(_, s)| similarity > s)
            {
                best = Some((existing.id, similarity));
            }
        }

        if let Some((target, similarity)) = best {
            let lock = self.row_lock(target);
            let _row = lock.lock().await;

            // consolidation may have absorbed the target since the scan
            if let Some(mut survivor) = self.repository.find_by_id(target).await? {
                survivor.absorb(&pattern);
                survivor.confidence = survivor.confidence.clamp(0.0, 1.0);
                self.repository.save(&survivor).await?;

                debug!(
                    pattern_id = %target,
                    similarity,
                    usage_count = survivor.usage_count,
                    "Merged incoming pattern into existing duplicate"
                );
                self.emit(LearningEvent::PatternMerged {
                    survivor_id: target,
                    absorbed_id: None,
                    usage_count: survivor.usage_count,
                    confidence: survivor.confidence,
                    timestamp: Utc::now(),
                });
                return Ok(StoreOutcome::Merged { into: target });
            }
        }

        let lock = self.row_lock(pattern.id);
        let _row = lock.lock().await;
        self.repository.save(&pattern).await?;
        self.index(&pattern).await;

        info!(
            pattern_id = %pattern.id,
            pattern_type = %pattern.pattern_type,
            name = %pattern.name,
            confidence = pattern.confidence,
            "Stored new pattern"
        );
        self.emit(LearningEvent::PatternDiscovered {
            pattern_id: pattern.id,
            pattern_type: pattern.pattern_type,
            name: pattern.name.clone(),
            confidence: pattern.confidence,
            timestamp: Utc::now(),
        });

        Ok(StoreOutcome::Inserted { id: pattern.id })
    }

    async fn index(&self, pattern: &Pattern) {
        if let Some(vectors) = &self.vectors {
            if let Err(e) = vectors.index_text(pattern.id, &pattern_text(pattern)).await {
                warn!(pattern_id = %pattern.id, "Failed to index pattern embedding: {}", e);
            }
        }
    }

    pub async fn get(&self, id: PatternId) -> CortexResult<Option<Pattern>> {
        Ok(self.repository.find_by_id(id).await?)
    }

    /// Like [`get`](Self::get) but a missing row is an error.
    pub async fn require(&self, id: PatternId) -> CortexResult<Pattern> {
        self.get(id)
            .await?
            .ok_or_else(|| CortexError::NotFound(format!("pattern {}", id)))
    }

    /// Patterns by descending confidence, then descending usage count.
    pub async fn search(&self, filter: &PatternFilter) -> CortexResult<Vec<Pattern>> {
        let mut patterns = match filter.pattern_type {
            Some(pattern_type) => self.repository.find_by_type(pattern_type).await?,
            None => self.repository.list_all().await?,
        };

        if let Some(min_confidence) = filter.min_confidence {
            patterns.retain(|p| p.confidence >= min_confidence);
        }

        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        if let Some(limit) = filter.limit {
            patterns.truncate(limit);
        }

        Ok(patterns)
    }

    pub async fn count(&self) -> CortexResult<usize> {
        Ok(self.repository.count().await?)
    }

    /// Mutate one pattern under its row lock and persist it.
    pub async fn update<F, R>(&self, id: PatternId, mutate: F) -> CortexResult<(Pattern, R)>
    where
        F: FnOnce(&mut Pattern) -> R + Send,
        R: Send,
    {
        let lock = self.row_lock(id);
        let _row = lock.lock().await;

        let mut pattern = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| CortexError::NotFound(format!("pattern {}", id)))?;

        let result = mutate(&mut pattern);
        pattern.confidence = pattern.confidence.clamp(0.0, 1.0);
        pattern.validate()?;
        self.repository.save(&pattern).await?;

        Ok((pattern, result))
    }

    pub async fn delete(&self, id: PatternId) -> CortexResult<bool> {
        let lock = self.row_lock(id);
        let _row = lock.lock().await;

        let removed = self.repository.delete(id).await?;
        if removed {
            self.drop_embedding(id).await;
        }
        Ok(removed)
    }

    async fn drop_embedding(&self, id: PatternId) {
        if let Some(vectors) = &self.vectors {
            if let Err(e) = vectors.remove(id).await {
                warn!(pattern_id = %id, "Failed to remove pattern embedding: {}", e);
            }
        }
    }

    pub async fn consolidate(
        &self,
        options: &ConsolidationOptions,
        cancel: &CancellationToken,
    ) -> CortexResult<ConsolidationReport> {
        let started = Instant::now();
        let now = options.as_of.unwrap_or_else(Utc::now);
        let mut report = ConsolidationReport::default();

        let completed = (!options.merge || self.merge_duplicates(cancel, &mut report).await?)
            && (!options.prune || self.prune_stale(now, cancel, &mut report).await?)
            && (!options.decay || self.decay_idle(now, cancel, &mut report).await?);

        report.interrupted = !completed;
        report.duration_ms = started.elapsed().as_millis() as u64;

        // entries nobody holds can be recreated on demand
        self.row_locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        info!(
            merged = report.merged,
            pruned = report.pruned,
            decayed = report.decayed,
            interrupted = report.interrupted,
            duration_ms = report.duration_ms,
            "Pattern consolidation finished"
        );
        self.emit(LearningEvent::ConsolidationCompleted {
            merged: report.merged,
            pruned: report.pruned,
            decayed: report.decayed,
            interrupted: report.interrupted,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Returns `false` when interrupted.
    async fn merge_duplicates(
        &self,
        cancel: &CancellationToken,
        report: &mut ConsolidationReport,
    ) -> CortexResult<bool> {
        let threshold = self.config.merge_similarity;

        loop {
            let snapshot = self.repository.list_all().await?;
            let mut removed: HashSet<PatternId> = HashSet::new();
            let mut merged_this_round = 0;

            for i in 0..snapshot.len() {
                for j in (i + 1)..snapshot.len() {
                    if removed.contains(&snapshot[i].id) {
                        break;
                    }
                    if removed.contains(&snapshot[j].id)
                        || !snapshot[i].is_duplicate_of(&snapshot[j], threshold)
                    {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Ok(false);
                    }
                    if let Some(loser) = self.merge_pair(snapshot[i].id, snapshot[j].id).await? {
                        removed.insert(loser);
                        merged_this_round += 1;
                    }
                }
            }

            report.merged += merged_this_round;
            if merged_this_round == 0 {
                return Ok(true);
            }
        }
    }

    /// Merge two rows if they are still duplicates. Returns the absorbed id.
    async fn merge_pair(&self, a: PatternId, b: PatternId) -> CortexResult<Option<PatternId>> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let _first = self.row_lock(first).lock_owned().await;
        let _second = self.row_lock(second).lock_owned().await;

        let (Some(x), Some(y)) = (
            self.repository.find_by_id(a).await?,
            self.repository.find_by_id(b).await?,
        ) else {
            return Ok(None);
        };
        if !x.is_duplicate_of(&y, self.config.merge_similarity) {
            return Ok(None);
        }

        let (mut survivor, loser) = if survives(&x, &y) { (x, y) } else { (y, x) };
        survivor.absorb(&loser);
        survivor.confidence = survivor.confidence.clamp(0.0, 1.0);

        self.repository.apply_merge(&survivor, loser.id).await?;
        self.drop_embedding(loser.id).await;

        debug!(
            survivor_id = %survivor.id,
            absorbed_id = %loser.id,
            usage_count = survivor.usage_count,
            "Merged duplicate patterns"
        );
        self.emit(LearningEvent::PatternMerged {
            survivor_id: survivor.id,
            absorbed_id: Some(loser.id),
            usage_count: survivor.usage_count,
            confidence: survivor.confidence,
            timestamp: Utc::now(),
        });

        Ok(Some(loser.id))
    }

    async fn prune_stale(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut ConsolidationReport,
    ) -> CortexResult<bool> {
        let min_confidence = self.config.prune_confidence_threshold;
        let min_usage = self.config.prune_usage_threshold;
        let max_age = self.config.prune_age_days;

        for candidate in self.repository.list_all().await? {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if !candidate.should_prune(min_confidence, min_usage, max_age, now) {
                continue;
            }

            let _row = self.row_lock(candidate.id).lock_owned().await;
            let Some(current) = self.repository.find_by_id(candidate.id).await? else {
                continue;
            };
            if !current.should_prune(min_confidence, min_usage, max_age, now) {
                continue;
            }

            if self.repository.delete(current.id).await? {
                self.drop_embedding(current.id).await;
                report.pruned += 1;

                debug!(
                    pattern_id = %current.id,
                    confidence = current.confidence,
                    usage_count = current.usage_count,
                    "Pruned stale pattern"
                );
                self.emit(LearningEvent::PatternPruned {
                    pattern_id: current.id,
                    final_confidence: current.confidence,
                    usage_count: current.usage_count,
                    age_days: current.age_days(now),
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(true)
    }

    async fn decay_idle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut ConsolidationReport,
    ) -> CortexResult<bool> {
        let idle_limit = self.config.decay_idle_days;
        let factor = self.config.decay_factor;

        for candidate in self.repository.list_all().await? {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if candidate.idle_days(now) <= idle_limit {
                continue;
            }

            let _row = self.row_lock(candidate.id).lock_owned().await;
            let Some(mut current) = self.repository.find_by_id(candidate.id).await? else {
                continue;
            };
            let idle_days = current.idle_days(now);
            if idle_days <= idle_limit {
                continue;
            }

            let old_confidence = current.confidence;
            current.confidence = (old_confidence * factor).clamp(0.0, 1.0);
            if current.confidence == old_confidence {
                continue;
            }
            self.repository.save(&current).await?;
            report.decayed += 1;

            self.emit(LearningEvent::PatternDecayed {
                pattern_id: current.id,
                old_confidence,
                new_confidence: current.confidence,
                idle_days,
                timestamp: Utc::now(),
            });
        }

        Ok(true)
    }
}

/// Whether `a` survives a merge with `b`: more usage wins, then the older pattern.
fn survives(a: &Pattern, b: &Pattern) -> bool {
    a.usage_count
        .cmp(&b.usage_count)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
        .is_ge()
}

/// Text embedded for a pattern's semantic lookup.
pub fn pattern_text(pattern: &Pattern) -> String {
    let mut text = format!("{} {}", pattern.name, pattern.steps.join(" "));
    if !pattern.description.is_empty() {
        text.push(' ');
        text.push_str(&pattern.description);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pattern::OutcomeKind;
    use crate::infrastructure::memory_repository::in_memory_repositories;
    use chrono::Duration;

    fn store() -> PatternStore {
        PatternStore::new(in_memory_repositories().patterns, StoreConfig::default())
    }

    fn pattern(name: &str, confidence: f64, usage: u64) -> Pattern {
        let mut p = Pattern::new(
            PatternType::Coordination,
            name,
            "",
            vec!["Read".to_string(), "Grep".to_string()],
        )
        .with_confidence(confidence);
        p.usage_count = usage;
        p.metrics.success_count = usage;
        p
    }

    #[tokio::test]
    async fn test_store_inserts_and_merges_duplicates() {
        let store = store();
        let first = store.store(pattern("Read -> Grep", 0.9, 30)).await.unwrap();
        assert!(!first.is_merge());

        let second = store.store(pattern("read  ->  GREP", 0.5, 10)).await.unwrap();
        assert_eq!(second, StoreOutcome::Merged { into: first.pattern_id() });
        assert_eq!(store.count().await.unwrap(), 1);

        let merged = store.require(first.pattern_id()).await.unwrap();
        assert_eq!(merged.usage_count, 40);
        assert_eq!(merged.metrics.success_count, 40);
        assert!((merged.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_different_types_never_merge() {
        let store = store();
        store.store(pattern("Read -> Grep", 0.9, 1)).await.unwrap();
        let mut other = pattern("Read -> Grep", 0.9, 1);
        other.pattern_type = PatternType::Optimization;
        assert!(!store.store(other).await.unwrap().is_merge());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_pattern() {
        let store = store();
        let err = store.store(pattern("Read -> Grep", 1.4, 0)).await.unwrap_err();
        assert!(matches!(err, CortexError::Validation(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_ordering_and_filters() {
        let store = store();
        store.store(pattern("alpha", 0.8, 5)).await.unwrap();
        store.store(pattern("bravo", 0.9, 1)).await.unwrap();
        store.store(pattern("charlie", 0.8, 50)).await.unwrap();
        store.store(pattern("delta", 0.2, 99)).await.unwrap();

        let all = store.search(&PatternFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bravo", "charlie", "alpha", "delta"]);

        let filtered = store
            .search(&PatternFilter {
                min_confidence: Some(0.5),
                limit: Some(2),
                ..PatternFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|p| p.confidence >= 0.5));

        assert!(store
            .search(&PatternFilter::of_type(PatternType::Testing))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = store();
        let result = store.update(PatternId::new(), |p| p.usage_count += 1).await;
        assert!(matches!(result, Err(CortexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let store = Arc::new(store());
        let id = store.store(pattern("Read -> Grep", 0.7, 0)).await.unwrap().pattern_id();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(id, |p| p.record_outcome(OutcomeKind::Success, 10.0, 1.0))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let p = store.require(id).await.unwrap();
        assert_eq!(p.usage_count, 25);
        assert_eq!(p.metrics.success_count, 25);
    }

    #[tokio::test]
    async fn test_consolidate_merges_seeded_duplicates() {
        let repos = in_memory_repositories();
        let store = PatternStore::new(repos.patterns.clone(), StoreConfig::default());

        // seeded directly so that `store` cannot merge them on the way in
        let keep = pattern("Edit -> Bash -> Test", 0.9, 20);
        let near = pattern("edit -> bash -> test", 0.6, 5);
        let other = pattern("Glob -> Read", 0.7, 3);
        for p in [&keep, &near, &other] {
            repos.patterns.save(p).await.unwrap();
        }

        let report = store
            .consolidate(&ConsolidationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.merged, 1);
        assert!(!report.interrupted);

        let remaining = store.search(&PatternFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 2);
        let survivor = store.require(keep.id).await.unwrap();
        assert_eq!(survivor.usage_count, 25);
        assert!((survivor.confidence - 0.84).abs() < 1e-9);
        assert!(store.get(near.id).await.unwrap().is_none());

        for (i, a) in remaining.iter().enumerate() {
            for b in remaining.iter().skip(i + 1) {
                assert!(!a.is_duplicate_of(b, 0.95));
            }
        }
    }

    #[tokio::test]
    async fn test_consolidate_prunes_stale_pattern() {
        let store = store();
        let now = Utc::now();

        let mut stale = pattern("Bash -> Bash", 0.2, 6);
        stale.created_at = now - Duration::days(60);
        let mut young = pattern("Read -> Edit", 0.2, 6);
        young.created_at = now - Duration::days(5);
        let mut used = pattern("Grep -> Edit", 0.2, 12);
        used.created_at = now - Duration::days(60);
        used.last_used = Some(now);

        let stale_id = store.store(stale).await.unwrap().pattern_id();
        store.store(young).await.unwrap();
        store.store(used).await.unwrap();

        let report = store
            .consolidate(&ConsolidationOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pruned, 1);
        assert!(store.get(stale_id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_decay_applies_once_per_pass() {
        let store = store();
        let now = Utc::now();
        let mut idle = pattern("Read -> Grep", 0.8, 40);
        idle.created_at = now - Duration::days(100);
        idle.last_used = Some(now - Duration::days(45));
        let id = store.store(idle).await.unwrap().pattern_id();

        let options = ConsolidationOptions {
            merge: false,
            prune: false,
            ..ConsolidationOptions::default()
        };
        let report = store.consolidate(&options, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.decayed, 1);
        assert!((store.require(id).await.unwrap().confidence - 0.76).abs() < 1e-9);

        store.consolidate(&options, &CancellationToken::new()).await.unwrap();
        assert!((store.require(id).await.unwrap().confidence - 0.722).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cancelled_pass_changes_nothing() {
        let repos = in_memory_repositories();
        let store = PatternStore::new(repos.patterns.clone(), StoreConfig::default());
        repos.patterns.save(&pattern("Read -> Grep", 0.9, 3)).await.unwrap();
        repos.patterns.save(&pattern("read -> grep", 0.9, 3)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = store.consolidate(&ConsolidationOptions::default(), &cancel).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.merged, 0);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[test]
    fn test_survivor_choice() {
        let a = pattern("a", 0.5, 10);
        let b = pattern("b", 0.5, 3);
        assert!(survives(&a, &b));
        assert!(!survives(&b, &a));

        let mut older = pattern("c", 0.5, 3);
        older.created_at = b.created_at - Duration::days(1);
        assert!(survives(&older, &b));
    }
}
