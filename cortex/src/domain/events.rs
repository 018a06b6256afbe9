// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the learning loop.
//!
//! Events are returned to callers through explicit values and are also handed
//! to any [`LearningObserver`] registered on the pipeline. There is no global
//! bus: observers are injected at construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pattern::{OutcomeKind, PatternId, PatternType};
use super::threshold::ThresholdKey;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningEvent {
    /// A new pattern was extracted or trained and stored
    PatternDiscovered {
        pattern_id: PatternId,
        pattern_type: PatternType,
        name: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A pattern was folded into an existing near-duplicate
    PatternMerged {
        survivor_id: PatternId,
        absorbed_id: Option<PatternId>,
        usage_count: u64,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    PatternApplied {
        pattern_id: PatternId,
        task_description: String,
        confidence: f64,
        score: f64,
        timestamp: DateTime<Utc>,
    },

    ConfidenceUpdated {
        pattern_id: PatternId,
        outcome: OutcomeKind,
        old_confidence: f64,
        new_confidence: f64,
        timestamp: DateTime<Utc>,
    },

    PatternPruned {
        pattern_id: PatternId,
        final_confidence: f64,
        usage_count: u64,
        age_days: i64,
        timestamp: DateTime<Utc>,
    },

    PatternDecayed {
        pattern_id: PatternId,
        old_confidence: f64,
        new_confidence: f64,
        idle_days: i64,
        timestamp: DateTime<Utc>,
    },

    ThresholdAdjusted {
        key: ThresholdKey,
        adjusted_threshold: f64,
        sample_size: u64,
        timestamp: DateTime<Utc>,
    },

    ObservationSkipped {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    ExtractionCompleted {
        observations: usize,
        candidates: usize,
        stored: usize,
        merged: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ConsolidationCompleted {
        merged: usize,
        pruned: usize,
        decayed: usize,
        interrupted: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl LearningEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LearningEvent::PatternDiscovered { timestamp, .. } => *timestamp,
            LearningEvent::PatternMerged { timestamp, .. } => *timestamp,
            LearningEvent::PatternApplied { timestamp, .. } => *timestamp,
            LearningEvent::ConfidenceUpdated { timestamp, .. } => *timestamp,
            LearningEvent::PatternPruned { timestamp, .. } => *timestamp,
            LearningEvent::PatternDecayed { timestamp, .. } => *timestamp,
            LearningEvent::ThresholdAdjusted { timestamp, .. } => *timestamp,
            LearningEvent::ObservationSkipped { timestamp, .. } => *timestamp,
            LearningEvent::ExtractionCompleted { timestamp, .. } => *timestamp,
            LearningEvent::ConsolidationCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LearningEvent::PatternDiscovered { .. } => "pattern_discovered",
            LearningEvent::PatternMerged { .. } => "pattern_merged",
            LearningEvent::PatternApplied { .. } => "pattern_applied",
            LearningEvent::ConfidenceUpdated { .. } => "confidence_updated",
            LearningEvent::PatternPruned { .. } => "pattern_pruned",
            LearningEvent::PatternDecayed { .. } => "pattern_decayed",
            LearningEvent::ThresholdAdjusted { .. } => "threshold_adjusted",
            LearningEvent::ObservationSkipped { .. } => "observation_skipped",
            LearningEvent::ExtractionCompleted { .. } => "extraction_completed",
            LearningEvent::ConsolidationCompleted { .. } => "consolidation_completed",
        }
    }
}

/// Callback notified of learning events. Must not block.
pub trait LearningObserver: Send + Sync {
    fn on_event(&self, event: &LearningEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LearningEvent::PatternDiscovered {
            pattern_id: PatternId::new(),
            pattern_type: PatternType::Coordination,
            name: "Read -> Grep".to_string(),
            confidence: 0.9,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"pattern_discovered\""));
        let deserialized: LearningEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_type(), deserialized.event_type());
        assert_eq!(event.timestamp(), deserialized.timestamp());
    }

    #[test]
    fn test_threshold_event_type() {
        let event = LearningEvent::ThresholdAdjusted {
            key: ThresholdKey::any_file("coder"),
            adjusted_threshold: 0.9,
            sample_size: 4,
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "threshold_adjusted");
    }
}
