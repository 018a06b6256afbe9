// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quality Scorer
//!
//! Composite score deciding whether a mined candidate becomes a pattern.
//!
//! | Component | Formula |
//! |-----------|---------|
//! | consistency | `max(0, 1 - stddev(instance outcomes))` |
//! | impact | `clamp01(0.5 + (rate - baseline_rate) / baseline_rate)` |
//! | generalizability | `clamp01(2 * (agents + directories) / (2 * instances))` |
//! | frequency | `0.3` below 3, `0.5` below 10, `0.7` below 50, else `1.0` |
//!
//! The overall score is the weighted sum (default weights 0.4/0.3/0.2/0.1).
//! When the baseline success rate is zero, impact is `1.0` for a candidate
//! with any success and `0.5` otherwise.

use crate::domain::candidate::{CandidatePattern, PopulationBaseline, QualityScore};
use crate::domain::config::QualityConfig;

pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn min_quality(&self) -> f64 {
        self.config.min_quality
    }

    pub fn score(&self, candidate: &CandidatePattern, baseline: &PopulationBaseline) -> QualityScore {
        let consistency = consistency(candidate);
        let impact = impact(candidate.success_rate, baseline.mean_success_rate);
        let generalizability = generalizability(candidate);
        let frequency = frequency(candidate.support);

        let overall = self.config.consistency_weight * consistency
            + self.config.impact_weight * impact
            + self.config.generalizability_weight * generalizability
            + self.config.frequency_weight * frequency;

        QualityScore {
            consistency,
            impact,
            generalizability,
            frequency,
            overall: overall.clamp(0.0, 1.0),
        }
    }

    pub fn accepts(&self, score: &QualityScore) -> bool {
        score.overall >= self.config.min_quality
    }
}

fn consistency(candidate: &CandidatePattern) -> f64 {
    if candidate.instances.is_empty() {
        return 0.0;
    }
    let n = candidate.instances.len() as f64;
    let mean = candidate.instances.iter().map(|i| i.outcome()).sum::<f64>() / n;
    let variance = candidate
        .instances
        .iter()
        .map(|i| (i.outcome() - mean).powi(2))
        .sum::<f64>()
        / n;
    (1.0 - variance.sqrt()).max(0.0)
}

fn impact(success_rate: f64, baseline_rate: f64) -> f64 {
    if baseline_rate <= 0.0 {
        return if success_rate > 0.0 { 1.0 } else { 0.5 };
    }
    (0.5 + (success_rate - baseline_rate) / baseline_rate).clamp(0.0, 1.0)
}

fn generalizability(candidate: &CandidatePattern) -> f64 {
    let instances = candidate.instances.len();
    if instances == 0 {
        return 0.0;
    }
    let diversity = candidate.distinct_agents() + candidate.distinct_directories();
    (2.0 * diversity as f64 / (2.0 * instances as f64)).clamp(0.0, 1.0)
}

fn frequency(support: usize) -> f64 {
    match support {
        0..=2 => 0.3,
        3..=9 => 0.5,
        10..=49 => 0.7,
        _ => 1.0,
    }
}
