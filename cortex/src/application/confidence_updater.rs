// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Confidence Updater
//!
//! Revises a pattern's confidence from one tracked outcome.
//!
//! This is a heuristic, EMA-like revision rather than true Bayesian inference:
//! the "likelihood" of the new evidence is approximated by the pattern's own
//! historical success rate (or its complement for a non-success outcome), fed
//! through Bayes' rule, and the pattern only moves `learning_rate` of the way
//! towards that posterior.
//!
//! ```text
//! posterior  = l*p / (l*p + (1-p)*(1-l))        (= p when the denominator is 0)
//! confidence = clamp01(p + learning_rate * (posterior - p))
//! ```
//!
//! [`ConfidenceUpdater::revise`] is pure: the same pattern and evidence always
//! yield the same revision. The pipeline applies it once per tracked outcome.

use serde::{Deserialize, Serialize};

use crate::domain::config::ConfidenceConfig;
use crate::domain::pattern::{OutcomeKind, Pattern};

/// Likelihood assumed for a pattern that has never been used.
const UNINFORMED_LIKELIHOOD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub outcome: OutcomeKind,
    /// Caller-reported performance in `[0, 1]`.
    pub performance_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceRevision {
    pub prior: f64,
    pub likelihood: f64,
    pub posterior: f64,
    pub confidence: f64,
    pub evidence_score: f64,
}

impl ConfidenceRevision {
    pub fn delta(&self) -> f64 {
        self.confidence - self.prior
    }
}

pub struct ConfidenceUpdater {
    config: ConfidenceConfig,
}

impl ConfidenceUpdater {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// success -> performance, partial -> performance * partial_weight, failure -> 0
    pub fn evidence_score(&self, evidence: &Evidence) -> f64 {
        let performance = if evidence.performance_score.is_finite() {
            evidence.performance_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        match evidence.outcome {
            OutcomeKind::Success => performance,
            OutcomeKind::Partial => performance * self.config.partial_weight,
            OutcomeKind::Failure => 0.0,
        }
    }

    pub fn revise(&self, pattern: &Pattern, evidence: &Evidence) -> ConfidenceRevision {
        let prior = pattern.confidence.clamp(0.0, 1.0);

        let historical = pattern.success_rate().unwrap_or(UNINFORMED_LIKELIHOOD);
        let likelihood = match evidence.outcome {
            OutcomeKind::Success => historical,
            OutcomeKind::Partial | OutcomeKind::Failure => 1.0 - historical,
        };

        let numerator = likelihood * prior;
        let denominator = numerator + (1.0 - prior) * (1.0 - likelihood);
        let posterior = if denominator > 0.0 {
            numerator / denominator
        } else {
            prior
        };

        let confidence = (prior + self.config.learning_rate * (posterior - prior)).clamp(0.0, 1.0);

        ConfidenceRevision {
            prior,
            likelihood,
            posterior,
            confidence,
            evidence_score: self.evidence_score(evidence),
        }
    }

    /// Revise, then record the outcome on the pattern (counts, usage, last use).
    pub fn apply(&self, pattern: &mut Pattern, evidence: &Evidence, duration_ms: f64) -> ConfidenceRevision {
        let revision = self.revise(pattern, evidence);
        pattern.record_outcome(evidence.outcome, duration_ms, revision.evidence_score);
        pattern.confidence = revision.confidence;
        revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pattern::PatternType;

    fn pattern(confidence: f64, successes: u64, usage: u64) -> Pattern {
        let mut p = Pattern::new(
            PatternType::Coordination,
            "Read -> Grep",
            "",
            vec!["Read".to_string(), "Grep".to_string()],
        )
        .with_confidence(confidence);
        p.usage_count = usage;
        p.metrics.success_count = successes;
        p.metrics.failure_count = usage - successes;
        p
    }

    fn updater() -> ConfidenceUpdater {
        ConfidenceUpdater::new(ConfidenceConfig::default())
    }

    #[test]
    fn test_evidence_scores() {
        let u = updater();
        let score = |outcome| u.evidence_score(&Evidence { outcome, performance_score: 0.8 });
        assert_eq!(score(OutcomeKind::Success), 0.8);
        assert_eq!(score(OutcomeKind::Partial), 0.4);
        assert_eq!(score(OutcomeKind::Failure), 0.0);
    }

    #[test]
    fn test_success_raises_confidence() {
        let p = pattern(0.6, 8, 10);
        let revision = updater().revise(&p, &Evidence { outcome: OutcomeKind::Success, performance_score: 1.0 });

        assert_eq!(revision.likelihood, 0.8);
        // 0.48 / (0.48 + 0.08)
        assert!((revision.posterior - 0.48 / 0.56).abs() < 1e-12);
        assert!((revision.confidence - (0.6 + 0.1 * (0.48 / 0.56 - 0.6))).abs() < 1e-12);
        assert!(revision.delta() > 0.0);
    }

    #[test]
    fn test_failure_lowers_confidence() {
        let p = pattern(0.6, 8, 10);
        let revision = updater().revise(&p, &Evidence { outcome: OutcomeKind::Failure, performance_score: 1.0 });
        assert!((revision.likelihood - 0.2).abs() < 1e-12);
        assert!(revision.confidence < 0.6);
        assert_eq!(revision.evidence_score, 0.0);
    }

    #[test]
    fn test_revision_is_deterministic() {
        let p = pattern(0.73, 3, 7);
        let evidence = Evidence { outcome: OutcomeKind::Partial, performance_score: 0.6 };
        assert_eq!(updater().revise(&p, &evidence), updater().revise(&p, &evidence));
    }

    #[test]
    fn test_zero_denominator_keeps_prior() {
        // prior 1.0 with a likelihood of 0 makes both terms vanish
        let p = pattern(1.0, 5, 5);
        let revision = updater().revise(&p, &Evidence { outcome: OutcomeKind::Failure, performance_score: 0.0 });
        assert_eq!(revision.likelihood, 0.0);
        assert_eq!(revision.posterior, 1.0);
        assert_eq!(revision.confidence, 1.0);
    }

    #[test]
    fn test_unused_pattern_stays_put() {
        let p = pattern(0.5, 0, 0);
        let revision = updater().revise(&p, &Evidence { outcome: OutcomeKind::Success, performance_score: 1.0 });
        assert_eq!(revision.posterior, 0.5);
        assert_eq!(revision.confidence, 0.5);
    }

    #[test]
    fn test_apply_records_outcome() {
        let mut p = pattern(0.6, 8, 10);
        let revision = updater().apply(
            &mut p,
            &Evidence { outcome: OutcomeKind::Success, performance_score: 0.9 },
            120.0,
        );
        assert_eq!(p.usage_count, 11);
        assert_eq!(p.metrics.success_count, 9);
        assert_eq!(p.confidence, revision.confidence);
        assert!(p.last_used.is_some());
    }

    #[test]
    fn test_confidence_stays_in_range() {
        let u = updater();
        for usage in 1..20u64 {
            for successes in 0..=usage {
                for prior in [0.0, 0.01, 0.5, 0.99, 1.0] {
                    for outcome in [OutcomeKind::Success, OutcomeKind::Partial, OutcomeKind::Failure] {
                        let revision = u.revise(
                            &pattern(prior, successes, usage),
                            &Evidence { outcome, performance_score: 0.7 },
                        );
                        assert!((0.0..=1.0).contains(&revision.confidence));
                    }
                }
            }
        }
    }
}
