// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Pipeline
//!
//! Orchestrates the learning loop around one [`PatternStore`] and one
//! [`VectorIndex`]:
//!
//! ```text
//! observe ──► buffer ──► flush ──► mine + cluster ──► score ──► store
//!                                                              │
//! apply_best_pattern ◄──────────── search / vector fallback ◄──┘
//!        │
//!        └──► track_outcome ──► confidence update + adaptive threshold
//! ```
//!
//! ## Lifecycle
//!
//! `Idle → Buffering → Extracting → Idle`. Consolidation runs beside that
//! cycle on its own gate and never blocks observation or extraction.
//!
//! ## Concurrency
//!
//! - `observe` calls run concurrently; only the buffer push is serialized.
//! - Flushes are coalesced: a flush requested while another is running is
//!   picked up by the running one instead of starting a second extraction.
//! - Consolidation passes (manual or scheduled) are serialized with each other.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::confidence_updater::{ConfidenceRevision, ConfidenceUpdater, Evidence};
use crate::application::consolidation_scheduler::{ConsolidationTarget, MaintenanceScheduler};
use crate::application::pattern_store::{
    ConsolidationOptions, ConsolidationReport, PatternFilter, PatternStore, StoreOutcome,
};
use crate::application::performance_clusterer::PerformanceClusterer;
use crate::application::quality_scorer::QualityScorer;
use crate::application::sequence_miner::SequenceMiner;
use crate::application::threshold_manager::ThresholdManager;
use crate::application::vector_index::{SimilarityMatch, VectorIndex};
use crate::application::working_memory::WorkingMemory;
use crate::domain::candidate::{CandidateOrigin, CandidatePattern, PopulationBaseline, QualityScore};
use crate::domain::capability::CapabilitySet;
use crate::domain::config::{CortexConfig, MaintenanceConfig, MiningConfig, PipelineConfig};
use crate::domain::embedding::EmbeddingGenerator;
use crate::domain::error::{CortexError, CortexResult};
use crate::domain::events::{LearningEvent, LearningObserver};
use crate::domain::observation::{ExecutionContext, Observation, ObservationOutcome};
use crate::domain::pattern::{OutcomeKind, Pattern, PatternId, PatternType, SuccessCriteria};
use crate::domain::repository::CortexRepositories;
use crate::domain::threshold::{AdaptiveThreshold, ThresholdKey, ThresholdSample};

pub const NO_SUITABLE_PATTERN: &str = "no suitable pattern";
pub const CONFIDENCE_TOO_LOW: &str = "confidence too low";

const CONDITION_AGENT_TYPE: &str = "agent_type";
const CONDITION_FILE_TYPE: &str = "file_type";
const VECTOR_FALLBACK_K: usize = 5;

/// Error returned by [`LearningPipeline::observe`].
#[derive(Debug, thiserror::Error)]
pub enum ObserveError<E> {
    /// The observed action itself failed; it was recorded first.
    #[error("{0}")]
    Action(E),

    #[error(transparent)]
    Engine(#[from] CortexError),
}

impl<E> ObserveError<E> {
    pub fn into_action(self) -> Option<E> {
        match self {
            ObserveError::Action(e) => Some(e),
            ObserveError::Engine(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Buffering,
    Extracting,
}

/// Who is asking for a pattern and what they can do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyContext {
    /// When set, the applied pattern is remembered for this task.
    pub task_id: Option<String>,
    pub agent_type: Option<String>,
    pub file_type: Option<String>,
    /// `None` means unrestricted.
    pub capabilities: Option<CapabilitySet>,
    pub pattern_type: Option<PatternType>,
}

impl ApplyContext {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub applied: bool,
    pub pattern_id: Option<PatternId>,
    pub confidence: Option<f64>,
    pub score: Option<f64>,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
}

impl ApplyResult {
    fn no_match() -> Self {
        Self {
            applied: false,
            pattern_id: None,
            confidence: None,
            score: None,
            reason: Some(NO_SUITABLE_PATTERN.to_string()),
            pattern: None,
        }
    }
}

/// One tracked outcome of a task that may have used a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Resolved from working memory through `task_id` when absent.
    pub pattern_id: Option<PatternId>,
    pub task_id: Option<String>,
    pub kind: OutcomeKind,
    pub performance_score: f64,
    pub duration_ms: f64,
    /// Adaptive thresholds are only updated when present.
    pub agent_type: Option<String>,
    pub file_type: Option<String>,
    /// Defaults to `performance_score`.
    pub truth_score: Option<f64>,
    /// Defaults to the current threshold for the key.
    pub required_threshold: Option<f64>,
}

impl TaskOutcome {
    pub fn new(kind: OutcomeKind, performance_score: f64, duration_ms: f64) -> Self {
        Self {
            pattern_id: None,
            task_id: None,
            kind,
            performance_score,
            duration_ms,
            agent_type: None,
            file_type: None,
            truth_score: None,
            required_threshold: None,
        }
    }

    pub fn for_pattern(mut self, pattern_id: PatternId) -> Self {
        self.pattern_id = Some(pattern_id);
        self
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_agent(mut self, agent_type: impl Into<String>, file_type: Option<&str>) -> Self {
        self.agent_type = Some(agent_type.into());
        self.file_type = file_type.map(str::to_string);
        self
    }
}

/// What [`LearningPipeline::track_outcome`] changed.
#[derive(Debug, Default)]
pub struct TrackedOutcome {
    /// `None` when no pattern could be resolved for the outcome.
    pub revision: Option<ConfidenceRevision>,
    pub threshold: Option<AdaptiveThreshold>,
    /// Set when the pattern was revised but the threshold sample could not be
    /// stored. Retry it with [`ThresholdManager::record`], not `track_outcome`.
    pub unrecorded_threshold: Option<UnrecordedThreshold>,
}

impl TrackedOutcome {
    pub fn is_complete(&self) -> bool {
        self.unrecorded_threshold.is_none()
    }
}

#[derive(Debug)]
pub struct UnrecordedThreshold {
    pub key: ThresholdKey,
    pub sample: ThresholdSample,
    pub error: CortexError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub observations: usize,
    pub skipped: usize,
    pub candidates: usize,
    pub stored: usize,
    pub merged: usize,
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl ExtractionReport {
    fn absorb(&mut self, other: ExtractionReport) {
        self.observations += other.observations;
        self.skipped += other.skipped;
        self.candidates += other.candidates;
        self.stored += other.stored;
        self.merged += other.merged;
        self.interrupted |= other.interrupted;
        self.duration_ms += other.duration_ms;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub observations_collected: u64,
    pub patterns_extracted: u64,
    pub patterns_stored: usize,
    pub patterns_applied: u64,
    pub avg_confidence: f64,
    /// Share of tracked outcomes that succeeded.
    pub success_rate: f64,
    pub outcomes_tracked: u64,
    pub observations_skipped: u64,
    pub extraction_runs: u64,
    pub consolidation_runs: u64,
}

#[derive(Default)]
struct Counters {
    observations_collected: AtomicU64,
    observations_skipped: AtomicU64,
    patterns_extracted: AtomicU64,
    patterns_applied: AtomicU64,
    outcomes_tracked: AtomicU64,
    outcomes_succeeded: AtomicU64,
    extraction_runs: AtomicU64,
    consolidation_runs: AtomicU64,
}

/// Clears the flag it was created for when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counts one running extraction until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct LearningPipeline {
    config: PipelineConfig,
    mining: MiningConfig,
    maintenance: MaintenanceConfig,

    miner: SequenceMiner,
    clusterer: PerformanceClusterer,
    scorer: QualityScorer,
    updater: ConfidenceUpdater,
    store: Arc<PatternStore>,
    vectors: Arc<VectorIndex>,
    thresholds: ThresholdManager,
    memory: Arc<WorkingMemory>,
    observer: Option<Arc<dyn LearningObserver>>,

    buffer: parking_lot::Mutex<Vec<Observation>>,
    flush_gate: tokio::sync::Mutex<()>,
    flush_pending: AtomicBool,
    extractions: AtomicUsize,
    consolidation_gate: tokio::sync::Mutex<()>,
    consolidating: AtomicBool,

    counters: Counters,
    shutdown_token: CancellationToken,
    shut_down: AtomicBool,
    scheduler: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LearningPipeline {
    /// Build a pipeline over `repositories`. The configuration is validated first.
    pub async fn open(
        config: CortexConfig,
        repositories: CortexRepositories,
        generator: Arc<dyn EmbeddingGenerator>,
        observer: Option<Arc<dyn LearningObserver>>,
    ) -> CortexResult<Self> {
        config
            .validate()
            .map_err(|e| CortexError::Config(e.to_string()))?;

        let vectors = Arc::new(
            VectorIndex::open(repositories.embeddings.clone(), generator, config.vector.clone()).await?,
        );

        let mut store = PatternStore::new(repositories.patterns.clone(), config.store.clone())
            .with_vector_index(vectors.clone());
        if let Some(observer) = &observer {
            store = store.with_observer(observer.clone());
        }

        info!(
            buffer_size = config.pipeline.observation_buffer_size,
            min_confidence = config.pipeline.min_confidence_threshold,
            model = %config.vector.model,
            "Learning pipeline ready"
        );

        Ok(Self {
            miner: SequenceMiner::new(config.mining.clone()),
            clusterer: PerformanceClusterer::new(config.clustering.clone()),
            scorer: QualityScorer::new(config.quality.clone()),
            updater: ConfidenceUpdater::new(config.confidence.clone()),
            store: Arc::new(store),
            vectors,
            thresholds: ThresholdManager::new(repositories.thresholds.clone(), config.thresholds.clone()),
            memory: Arc::new(WorkingMemory::new(Duration::from_secs(
                config.pipeline.working_memory_ttl_seconds,
            ))),
            observer,
            buffer: parking_lot::Mutex::new(Vec::with_capacity(config.pipeline.observation_buffer_size)),
            flush_gate: tokio::sync::Mutex::new(()),
            flush_pending: AtomicBool::new(false),
            extractions: AtomicUsize::new(0),
            consolidation_gate: tokio::sync::Mutex::new(()),
            consolidating: AtomicBool::new(false),
            counters: Counters::default(),
            shutdown_token: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            scheduler: parking_lot::Mutex::new(None),
            config: config.pipeline,
            mining: config.mining,
            maintenance: config.maintenance,
        })
    }

    /// Share `memory` with other components instead of the pipeline's own.
    /// The pipeline still clears it on shutdown.
    pub fn with_working_memory(mut self, memory: Arc<WorkingMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn pattern_store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    pub fn vector_index(&self) -> &Arc<VectorIndex> {
        &self.vectors
    }

    pub fn threshold_manager(&self) -> &ThresholdManager {
        &self.thresholds
    }

    pub fn working_memory(&self) -> &Arc<WorkingMemory> {
        &self.memory
    }

    /// Number of batches being extracted right now.
    pub fn extractions_in_flight(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        if self.extractions_in_flight() > 0 {
            PipelineState::Extracting
        } else if !self.buffer.lock().is_empty() {
            PipelineState::Buffering
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_consolidating(&self) -> bool {
        self.consolidating.load(Ordering::SeqCst)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn emit(&self, event: LearningEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    fn ensure_running(&self) -> CortexResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(CortexError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `execute`, record what happened and hand its result back.
    ///
    /// The observation is recorded whether or not the action succeeds. When
    /// the action fails its own error is returned as [`ObserveError::Action`];
    /// a recording failure is then only logged so the caller still sees the
    /// action error.
    pub async fn observe<F, Fut, T, E>(
        &self,
        action: &str,
        parameters: BTreeMap<String, Value>,
        mut context: ExecutionContext,
        execute: F,
    ) -> Result<T, ObserveError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.ensure_running()?;

        let started = Instant::now();
        let result = execute().await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match &result {
            Ok(_) => ObservationOutcome::succeeded(),
            Err(e) => ObservationOutcome::failed(e.to_string()),
        };
        context.active_pattern_ids = self.memory.active_patterns(&context.task_id);
        let observation = Observation::new(action, parameters, outcome, duration_ms, context);

        match (self.record(observation).await, result) {
            (Ok(()), Ok(value)) => Ok(value),
            (Err(e), Ok(_)) => Err(ObserveError::Engine(e)),
            (recorded, Err(e)) => {
                if let Err(record_error) = recorded {
                    warn!(action, "Failed to record failed action: {}", record_error);
                }
                Err(ObserveError::Action(e))
            }
        }
    }

    /// Buffer an already-built observation, flushing when the buffer is full.
    pub async fn record(&self, observation: Observation) -> CortexResult<()> {
        self.ensure_running()?;

        let full = {
            let mut buffer = self.buffer.lock();
            buffer.push(observation);
            buffer.len() >= self.config.observation_buffer_size
        };
        self.counters.observations_collected.fetch_add(1, Ordering::Relaxed);

        if full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Extract patterns from everything buffered so far.
    ///
    /// Returns an empty report when another flush is already running; that
    /// flush picks up the buffered observations.
    pub async fn flush(&self) -> CortexResult<ExtractionReport> {
        self.flush_pending.store(true, Ordering::SeqCst);
        let mut total = ExtractionReport::default();

        loop {
            {
                let Ok(_gate) = self.flush_gate.try_lock() else {
                    return Ok(total);
                };
                while self.flush_pending.swap(false, Ordering::SeqCst) {
                    let batch = std::mem::take(&mut *self.buffer.lock());
                    if batch.is_empty() {
                        continue;
                    }
                    let report = self.extract_batch(batch, &CancellationToken::new()).await?;
                    total.absorb(report);
                }
            }
            // a request may have arrived after the last swap but before the gate was released
            if !self.flush_pending.load(Ordering::SeqCst) {
                return Ok(total);
            }
        }
    }

    /// Mine, cluster, score and store one batch. Interruptible between candidates.
    pub async fn extract_batch(
        &self,
        batch: Vec<Observation>,
        cancel: &CancellationToken,
    ) -> CortexResult<ExtractionReport> {
        let _extracting = InFlight::enter(&self.extractions);
        let started = Instant::now();
        let mut report = ExtractionReport {
            observations: batch.len(),
            ..ExtractionReport::default()
        };

        let mut valid = Vec::with_capacity(batch.len());
        for observation in batch {
            match observation.defect() {
                None => valid.push(observation),
                Some(reason) => {
                    let error = CortexError::Extraction(reason);
                    warn!("Skipping observation: {}", error);
                    report.skipped += 1;
                    self.counters.observations_skipped.fetch_add(1, Ordering::Relaxed);
                    self.emit(LearningEvent::ObservationSkipped {
                        reason: error.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        let accepted = self.select_candidates(&valid);
        report.candidates = accepted.len();
        self.counters
            .patterns_extracted
            .fetch_add(accepted.len() as u64, Ordering::Relaxed);

        for (candidate, quality) in &accepted {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            match self.store.store(self.to_pattern(candidate, quality)).await? {
                StoreOutcome::Inserted { .. } => report.stored += 1,
                StoreOutcome::Merged { .. } => report.merged += 1,
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.counters.extraction_runs.fetch_add(1, Ordering::Relaxed);

        info!(
            observations = report.observations,
            skipped = report.skipped,
            candidates = report.candidates,
            stored = report.stored,
            merged = report.merged,
            "Pattern extraction completed"
        );
        self.emit(LearningEvent::ExtractionCompleted {
            observations: report.observations,
            candidates: report.candidates,
            stored: report.stored,
            merged: report.merged,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Sequences and clusters that pass the quality bar. Clusters whose
    /// dominant actions an accepted sequence already covers are dropped.
    fn select_candidates(&self, observations: &[Observation]) -> Vec<(CandidatePattern, QualityScore)> {
        if observations.is_empty() {
            return Vec::new();
        }
        let baseline = PopulationBaseline::from_observations(observations);

        let mut accepted: Vec<(CandidatePattern, QualityScore)> = Vec::new();
        for candidate in self.miner.mine(observations) {
            let quality = self.scorer.score(&candidate, &baseline);
            if self.scorer.accepts(&quality) {
                accepted.push((candidate, quality));
            } else {
                debug!(
                    name = %candidate.display_name(),
                    quality = quality.overall,
                    "Sequence below quality bar"
                );
            }
        }

        for cluster in self.clusterer.cluster(observations) {
            if cluster.dominant_actions.is_empty() {
                continue;
            }
            let confirmed = accepted.iter().any(|(sequence, _)| {
                sequence.origin == CandidateOrigin::Sequence && sequence.covers(&cluster.dominant_actions)
            });
            if confirmed {
                debug!(actions = ?cluster.dominant_actions, "Cluster confirms an accepted sequence");
                continue;
            }

            let candidate = cluster.to_candidate();
            let quality = self.scorer.score(&candidate, &baseline);
            if self.scorer.accepts(&quality) {
                accepted.push((candidate, quality));
            }
        }

        accepted
    }

    fn to_pattern(&self, candidate: &CandidatePattern, quality: &QualityScore) -> Pattern {
        let (pattern_type, origin) = match candidate.origin {
            CandidateOrigin::Sequence => (classify_sequence(&candidate.actions), "sequence"),
            CandidateOrigin::Cluster => (PatternType::Optimization, "cluster"),
        };

        let completion = candidate
            .success_rate
            .max(self.mining.min_confidence)
            .clamp(0.0, 1.0);

        let mut pattern = Pattern::new(
            pattern_type,
            candidate.display_name(),
            format!(
                "{} of {} observed {} times (quality {:.2})",
                origin,
                candidate.actions.len(),
                candidate.support,
                quality.overall
            ),
            candidate.actions.clone(),
        )
        .with_confidence(candidate.success_rate.clamp(0.0, 1.0));

        pattern.success_criteria = SuccessCriteria {
            min_completion_rate: completion,
            max_error_rate: 1.0 - completion,
        };
        if candidate.average_duration_ms.is_finite() && candidate.average_duration_ms >= 0.0 {
            pattern.metrics.average_duration_ms = candidate.average_duration_ms;
        }
        pattern
    }

    /// Pick the best stored pattern for a task.
    pub async fn apply_best_pattern(
        &self,
        task_description: &str,
        context: &ApplyContext,
    ) -> CortexResult<ApplyResult> {
        let now = Utc::now();
        let wanted = keywords(task_description);

        let filter = PatternFilter {
            pattern_type: context.pattern_type,
            ..PatternFilter::default()
        };
        let mut best: Option<(Pattern, f64)> = None;
        for pattern in self.store.search(&filter).await? {
            if !matches_context(&pattern, context) || !shares_keywords(&pattern, &wanted) {
                continue;
            }
            let score = self.rank(&pattern, now);
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((pattern, score));
            }
        }

        if best.is_none() && self.config.vector_fallback {
            best = self.vector_candidate(task_description, context, now).await?;
        }

        let Some((pattern, score)) = best else {
            debug!(task = task_description, "No suitable pattern");
            return Ok(ApplyResult::no_match());
        };

        if pattern.confidence < self.config.min_confidence_threshold {
            debug!(
                pattern_id = %pattern.id,
                confidence = pattern.confidence,
                "Best pattern below confidence threshold"
            );
            return Ok(ApplyResult {
                applied: false,
                pattern_id: Some(pattern.id),
                confidence: Some(pattern.confidence),
                score: Some(score),
                reason: Some(CONFIDENCE_TOO_LOW.to_string()),
                pattern: None,
            });
        }

        if let Some(task_id) = &context.task_id {
            self.memory.remember(task_id, pattern.id);
        }
        self.counters.patterns_applied.fetch_add(1, Ordering::Relaxed);

        info!(
            pattern_id = %pattern.id,
            name = %pattern.name,
            confidence = pattern.confidence,
            score,
            "Applying pattern"
        );
        self.emit(LearningEvent::PatternApplied {
            pattern_id: pattern.id,
            task_description: task_description.to_string(),
            confidence: pattern.confidence,
            score,
            timestamp: now,
        });

        Ok(ApplyResult {
            applied: true,
            pattern_id: Some(pattern.id),
            confidence: Some(pattern.confidence),
            score: Some(score),
            reason: None,
            pattern: Some(pattern),
        })
    }

    async fn vector_candidate(
        &self,
        task_description: &str,
        context: &ApplyContext,
        now: DateTime<Utc>,
    ) -> CortexResult<Option<(Pattern, f64)>> {
        let matches = match self
            .vectors
            .search_text(task_description, VECTOR_FALLBACK_K, self.config.vector_min_similarity)
            .await
        {
            Ok(matches) => matches,
            Err(CortexError::Storage(e)) => return Err(CortexError::Storage(e)),
            Err(e) => {
                debug!("Vector fallback unavailable: {}", e);
                return Ok(None);
            }
        };

        let mut best: Option<(Pattern, f64)> = None;
        for found in matches {
            let Some(pattern) = self.store.get(found.pattern_id).await? else {
                continue;
            };
            if !matches_context(&pattern, context) {
                continue;
            }
            let score = self.rank(&pattern, now);
            if best.as_ref().map_or(true, |(_, s)| score > *s) {
                best = Some((pattern, score));
            }
        }
        Ok(best)
    }

    /// `0.6·confidence + 0.2·min(1, usage/100) + 0.2·recency`
    fn rank(&self, pattern: &Pattern, now: DateTime<Utc>) -> f64 {
        let usage = (pattern.usage_count as f64 / 100.0).min(1.0);
        let window_days = self.config.recency_window_days.max(1) as f64;
        let last_seen = pattern.last_used.unwrap_or(pattern.created_at);
        let idle_days = (now - last_seen).num_seconds().max(0) as f64 / 86_400.0;
        let recency = (1.0 - idle_days / window_days).clamp(0.0, 1.0);

        0.6 * pattern.confidence + 0.2 * usage + 0.2 * recency
    }

    /// Fold one outcome into pattern confidence and the adaptive threshold.
    ///
    /// An `Err` means nothing was changed and the call can be repeated. Once
    /// the pattern is revised the call succeeds; a threshold sample that
    /// could not be stored after that is returned in
    /// [`TrackedOutcome::unrecorded_threshold`]. Never retried internally.
    pub async fn track_outcome(&self, outcome: TaskOutcome) -> CortexResult<TrackedOutcome> {
        if !outcome.performance_score.is_finite() {
            return Err(CortexError::validation("performance score must be finite"));
        }

        let pattern_id = outcome.pattern_id.or_else(|| {
            outcome
                .task_id
                .as_deref()
                .and_then(|task_id| self.memory.latest_pattern(task_id))
        });

        let threshold_sample = match &outcome.agent_type {
            Some(agent_type) => Some(self.threshold_sample(agent_type, &outcome).await?),
            None => None,
        };

        let revision = match pattern_id {
            Some(id) => {
                let evidence = Evidence {
                    outcome: outcome.kind,
                    performance_score: outcome.performance_score,
                };
                let updater = &self.updater;
                let duration_ms = outcome.duration_ms;
                let (pattern, revision) = self
                    .store
                    .update(id, |p| updater.apply(p, &evidence, duration_ms))
                    .await?;

                debug!(
                    pattern_id = %id,
                    outcome = ?outcome.kind,
                    old_confidence = revision.prior,
                    new_confidence = revision.confidence,
                    usage_count = pattern.usage_count,
                    "Pattern confidence revised"
                );
                self.emit(LearningEvent::ConfidenceUpdated {
                    pattern_id: id,
                    outcome: outcome.kind,
                    old_confidence: revision.prior,
                    new_confidence: revision.confidence,
                    timestamp: Utc::now(),
                });
                Some(revision)
            }
            None => {
                debug!(task_id = ?outcome.task_id, "Outcome has no pattern to credit");
                None
            }
        };

        let mut tracked = TrackedOutcome {
            revision,
            ..TrackedOutcome::default()
        };

        if let Some((key, sample)) = threshold_sample {
            match self.thresholds.record(key.clone(), sample).await {
                Ok(threshold) => {
                    self.emit(LearningEvent::ThresholdAdjusted {
                        key: threshold.key.clone(),
                        adjusted_threshold: threshold.adjusted_threshold,
                        sample_size: threshold.sample_size,
                        timestamp: Utc::now(),
                    });
                    tracked.threshold = Some(threshold);
                }
                // nothing was applied yet
                Err(e) if tracked.revision.is_none() => return Err(e),
                Err(e) => {
                    warn!(key = %key, "Pattern revised but threshold sample was not stored: {}", e);
                    tracked.unrecorded_threshold = Some(UnrecordedThreshold { key, sample, error: e });
                }
            }
        }

        self.counters.outcomes_tracked.fetch_add(1, Ordering::Relaxed);
        if outcome.kind == OutcomeKind::Success {
            self.counters.outcomes_succeeded.fetch_add(1, Ordering::Relaxed);
        }

        Ok(tracked)
    }

    /// Threshold key and sample for an outcome reported by `agent_type`.
    async fn threshold_sample(
        &self,
        agent_type: &str,
        outcome: &TaskOutcome,
    ) -> CortexResult<(ThresholdKey, ThresholdSample)> {
        let file_type = outcome.file_type.as_deref();
        let truth_score = outcome.truth_score.unwrap_or(outcome.performance_score);
        let required_threshold = match outcome.required_threshold {
            Some(required) => required,
            None => self.thresholds.get_threshold(agent_type, file_type).await?,
        };
        if !truth_score.is_finite() || !required_threshold.is_finite() {
            return Err(CortexError::validation("threshold scores must be finite"));
        }
        let sample = ThresholdSample {
            truth_score,
            required_threshold,
            passed: truth_score >= required_threshold,
        };
        Ok((ThresholdKey::new(agent_type, file_type), sample))
    }

    /// Seed a pattern by hand. It is validated before it is stored.
    pub async fn train(&self, pattern: Pattern) -> CortexResult<StoreOutcome> {
        self.store.store(pattern).await
    }

    pub async fn get_metrics(&self) -> CortexResult<EngineMetrics> {
        let patterns = self.store.search(&PatternFilter::default()).await?;
        let avg_confidence = if patterns.is_empty() {
            0.0
        } else {
            patterns.iter().map(|p| p.confidence).sum::<f64>() / patterns.len() as f64
        };

        let tracked = self.counters.outcomes_tracked.load(Ordering::Relaxed);
        let succeeded = self.counters.outcomes_succeeded.load(Ordering::Relaxed);
        let success_rate = if tracked == 0 {
            0.0
        } else {
            succeeded as f64 / tracked as f64
        };

        Ok(EngineMetrics {
            observations_collected: self.counters.observations_collected.load(Ordering::Relaxed),
            patterns_extracted: self.counters.patterns_extracted.load(Ordering::Relaxed),
            patterns_stored: patterns.len(),
            patterns_applied: self.counters.patterns_applied.load(Ordering::Relaxed),
            avg_confidence,
            success_rate,
            outcomes_tracked: tracked,
            observations_skipped: self.counters.observations_skipped.load(Ordering::Relaxed),
            extraction_runs: self.counters.extraction_runs.load(Ordering::Relaxed),
            consolidation_runs: self.counters.consolidation_runs.load(Ordering::Relaxed),
        })
    }

    pub async fn get_adaptive_threshold(&self, agent_type: &str, file_type: Option<&str>) -> CortexResult<f64> {
        self.thresholds.get_threshold(agent_type, file_type).await
    }

    pub async fn embed(&self, text: &str) -> CortexResult<Vec<f32>> {
        self.vectors.embed(text).await
    }

    pub async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> CortexResult<Vec<SimilarityMatch>> {
        self.vectors.similarity_search(query, k, min_similarity).await
    }

    /// Merge, prune and decay. Interrupted by [`shutdown`](Self::shutdown).
    pub async fn consolidate_patterns(&self) -> CortexResult<ConsolidationReport> {
        self.ensure_running()?;

        let _gate = self.consolidation_gate.lock().await;
        let _consolidating = FlagGuard::raise(&self.consolidating);

        let report = self
            .store
            .consolidate(&ConsolidationOptions::default(), &self.shutdown_token)
            .await?;
        self.counters.consolidation_runs.fetch_add(1, Ordering::Relaxed);
        Ok(report)
    }

    /// Start the maintenance scheduler. Does nothing when maintenance is
    /// disabled or the scheduler is already running.
    pub fn start(self: &Arc<Self>) {
        if !self.maintenance.enabled || self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return;
        }

        let scheduler = Arc::new(MaintenanceScheduler::with_token(
            self.clone() as Arc<dyn ConsolidationTarget>,
            self.maintenance.clone(),
            self.shutdown_token.child_token(),
        ));
        *slot = Some(scheduler.start());
    }

    /// Stop the scheduler, flush what is buffered and clear working memory.
    /// Later calls are no-ops.
    pub async fn shutdown(&self) -> CortexResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down learning pipeline");

        self.shutdown_token.cancel();
        let scheduler = self.scheduler.lock().take();
        if let Some(handle) = scheduler {
            if let Err(e) = handle.await {
                warn!("Maintenance scheduler ended abnormally: {}", e);
            }
        }

        let flushed = self.flush().await;
        self.memory.clear();

        let report = flushed?;
        info!(
            stored = report.stored,
            merged = report.merged,
            "Learning pipeline stopped"
        );
        Ok(())
    }
}

#[async_trait]
impl ConsolidationTarget for LearningPipeline {
    async fn run_consolidation(&self) -> CortexResult<ConsolidationReport> {
        self.consolidate_patterns().await
    }

    async fn run_flush(&self) -> CortexResult<usize> {
        Ok(self.flush().await?.candidates)
    }
}

fn classify_sequence(actions: &[String]) -> PatternType {
    let lowered: Vec<String> = actions.iter().map(|a| a.to_lowercase()).collect();
    let any = |needles: &[&str]| lowered.iter().any(|a| needles.iter().any(|n| a.contains(n)));

    if any(&["test"]) {
        PatternType::Testing
    } else if any(&["retry", "recover", "fix"]) {
        PatternType::ErrorHandling
    } else if any(&["refactor", "rename"]) {
        PatternType::Refactoring
    } else {
        PatternType::Coordination
    }
}

/// Lowercased word tokens of at least three characters.
fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Empty task descriptions match everything.
fn shares_keywords(pattern: &Pattern, wanted: &BTreeSet<String>) -> bool {
    if wanted.is_empty() {
        return true;
    }
    let mut vocabulary = keywords(&pattern.name);
    for step in &pattern.steps {
        vocabulary.extend(keywords(step));
    }
    for value in pattern.conditions.values() {
        vocabulary.extend(keywords(value));
    }
    vocabulary.extend(keywords(pattern.pattern_type.as_str()));

    !vocabulary.is_disjoint(wanted)
}

/// Type, condition and capability checks against the caller.
fn matches_context(pattern: &Pattern, context: &ApplyContext) -> bool {
    if let Some(pattern_type) = context.pattern_type {
        if pattern.pattern_type != pattern_type {
            return false;
        }
    }

    for (condition, offered) in [
        (CONDITION_AGENT_TYPE, context.agent_type.as_deref()),
        (CONDITION_FILE_TYPE, context.file_type.as_deref()),
    ] {
        if let (Some(required), Some(offered)) = (pattern.conditions.get(condition), offered) {
            if !required.eq_ignore_ascii_case(offered) {
                return false;
            }
        }
    }

    match &context.capabilities {
        Some(offered) => offered.is_superset(&CapabilitySet::required_by(pattern)),
        None => true,
    }
}
