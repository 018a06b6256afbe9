// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod sequence_miner;
pub mod performance_clusterer;
pub mod quality_scorer;
pub mod confidence_updater;
pub mod threshold_manager;
pub mod vector_index;
pub mod pattern_store;
pub mod working_memory;
pub mod consolidation_scheduler;
pub mod pipeline;

// Re-export services for convenience
pub use sequence_miner::SequenceMiner;
pub use performance_clusterer::{BehaviorCluster, PerformanceClusterer};
pub use quality_scorer::QualityScorer;
pub use confidence_updater::{ConfidenceRevision, ConfidenceUpdater, Evidence};
pub use threshold_manager::ThresholdManager;
pub use vector_index::{SimilarityMatch, VectorIndex};
pub use pattern_store::{ConsolidationOptions, ConsolidationReport, PatternFilter, PatternStore, StoreOutcome};
pub use working_memory::WorkingMemory;
pub use consolidation_scheduler::{ConsolidationTarget, MaintenanceScheduler};
pub use pipeline::{
    ApplyContext, ApplyResult, EngineMetrics, ExtractionReport, LearningPipeline, ObserveError, PipelineState,
    TaskOutcome, TrackedOutcome, UnrecordedThreshold,
};
