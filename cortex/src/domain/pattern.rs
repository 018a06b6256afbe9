// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Aggregate
//!
//! A [`Pattern`] is a reusable recipe: an ordered list of action steps with
//! success criteria, outcome metrics and a confidence in `[0, 1]`. Patterns are
//! owned by the pattern store and are only mutated through its operations.
//!
//! Two patterns are merge candidates when they share a [`PatternType`] and the
//! normalized edit distance of their canonical names is at or above the
//! configured merge similarity (see [`name_similarity`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::{CortexError, CortexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> CortexResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| CortexError::validation(format!("invalid pattern id '{}': {}", value, e)))
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    Coordination,
    Optimization,
    ErrorHandling,
    DomainSpecific,
    Refactoring,
    Testing,
}

impl PatternType {
    pub const ALL: [PatternType; 6] = [
        PatternType::Coordination,
        PatternType::Optimization,
        PatternType::ErrorHandling,
        PatternType::DomainSpecific,
        PatternType::Refactoring,
        PatternType::Testing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Coordination => "coordination",
            PatternType::Optimization => "optimization",
            PatternType::ErrorHandling => "error-handling",
            PatternType::DomainSpecific => "domain-specific",
            PatternType::Refactoring => "refactoring",
            PatternType::Testing => "testing",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CortexError::validation(format!("unknown pattern type '{}'", s)))
    }
}

/// Outcome of applying a pattern once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub min_completion_rate: f64,
    pub max_error_rate: f64,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            min_completion_rate: 0.7,
            max_error_rate: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    pub partial_count: u64,
    pub average_duration_ms: f64,
    /// Running mean of evidence scores, i.e. improvement over the baseline.
    pub average_improvement: f64,
}

impl PatternMetrics {
    pub fn outcome_count(&self) -> u64 {
        self.success_count + self.failure_count + self.partial_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub pattern_type: PatternType,
    pub name: String,
    pub description: String,
    pub conditions: BTreeMap<String, String>,
    pub steps: Vec<String>,
    pub success_criteria: SuccessCriteria,
    pub metrics: PatternMetrics,
    pub confidence: f64,
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl Pattern {
    pub fn new(
        pattern_type: PatternType,
        name: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<String>,
    ) -> Self {
        Self {
            id: PatternId::new(),
            pattern_type,
            name: name.into(),
            description: description.into(),
            conditions: BTreeMap::new(),
            steps,
            success_criteria: SuccessCriteria::default(),
            metrics: PatternMetrics::default(),
            confidence: 0.5,
            usage_count: 0,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Lowercased, trimmed name with internal whitespace collapsed.
    pub fn canonical_name(&self) -> String {
        canonicalize(&self.name)
    }

    /// Historical success rate, `None` until the pattern has been used.
    pub fn success_rate(&self) -> Option<f64> {
        if self.usage_count == 0 {
            None
        } else {
            Some((self.metrics.success_count as f64 / self.usage_count as f64).clamp(0.0, 1.0))
        }
    }

    pub fn validate(&self) -> CortexResult<()> {
        if self.name.trim().is_empty() {
            return Err(CortexError::validation("pattern name cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(CortexError::validation(format!(
                "pattern '{}' must have at least one step",
                self.name
            )));
        }
        if self.steps.iter().any(|s| s.trim().is_empty()) {
            return Err(CortexError::validation(format!(
                "pattern '{}' has an empty step",
                self.name
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(CortexError::validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        for (label, rate) in [
            ("min_completion_rate", self.success_criteria.min_completion_rate),
            ("max_error_rate", self.success_criteria.max_error_rate),
        ] {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(CortexError::validation(format!("{} {} outside [0, 1]", label, rate)));
            }
        }
        if !self.metrics.average_duration_ms.is_finite() || self.metrics.average_duration_ms < 0.0 {
            return Err(CortexError::validation("average duration must be a non-negative number"));
        }
        if !self.metrics.average_improvement.is_finite() {
            return Err(CortexError::validation("average improvement must be finite"));
        }
        Ok(())
    }

    /// Whether two patterns may be merged under `threshold`.
    pub fn is_duplicate_of(&self, other: &Pattern, threshold: f64) -> bool {
        self.pattern_type == other.pattern_type
            && name_similarity(&self.canonical_name(), &other.canonical_name()) >= threshold
    }

    /// Absorb `other` into `self`: counts are summed, confidence becomes the
    /// usage-weighted mean, the newer `last_used` and older `created_at` win.
    pub fn absorb(&mut self, other: &Pattern) {
        let total_usage = self.usage_count + other.usage_count;
        self.confidence = if total_usage == 0 {
            (self.confidence + other.confidence) / 2.0
        } else {
            (self.confidence * self.usage_count as f64 + other.confidence * other.usage_count as f64)
                / total_usage as f64
        }
        .clamp(0.0, 1.0);

        let own_outcomes = self.metrics.outcome_count();
        let other_outcomes = other.metrics.outcome_count();
        let total_outcomes = own_outcomes + other_outcomes;
        if total_outcomes > 0 {
            self.metrics.average_duration_ms = (self.metrics.average_duration_ms * own_outcomes as f64
                + other.metrics.average_duration_ms * other_outcomes as f64)
                / total_outcomes as f64;
            self.metrics.average_improvement = (self.metrics.average_improvement * own_outcomes as f64
                + other.metrics.average_improvement * other_outcomes as f64)
                / total_outcomes as f64;
        }

        self.metrics.success_count += other.metrics.success_count;
        self.metrics.failure_count += other.metrics.failure_count;
        self.metrics.partial_count += other.metrics.partial_count;
        self.usage_count = total_usage;

        self.last_used = match (self.last_used, other.last_used) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.created_at = self.created_at.min(other.created_at);

        for (key, value) in &other.conditions {
            self.conditions.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Count one tracked outcome against this pattern.
    pub fn record_outcome(&mut self, kind: OutcomeKind, duration_ms: f64, evidence_score: f64) {
        let previous = self.metrics.outcome_count() as f64;
        match kind {
            OutcomeKind::Success => self.metrics.success_count += 1,
            OutcomeKind::Partial => self.metrics.partial_count += 1,
            OutcomeKind::Failure => self.metrics.failure_count += 1,
        }
        let total = previous + 1.0;
        if duration_ms.is_finite() && duration_ms >= 0.0 {
            self.metrics.average_duration_ms =
                (self.metrics.average_duration_ms * previous + duration_ms) / total;
        }
        self.metrics.average_improvement =
            (self.metrics.average_improvement * previous + evidence_score) / total;
        self.usage_count += 1;
        self.last_used = Some(Utc::now());
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Days since the pattern was last used, or since creation when never used.
    pub fn idle_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_used.unwrap_or(self.created_at)).num_days()
    }

    pub fn should_prune(
        &self,
        min_confidence: f64,
        min_usage: u64,
        max_age_days: i64,
        now: DateTime<Utc>,
    ) -> bool {
        self.confidence < min_confidence && self.usage_count < min_usage && self.age_days(now) > max_age_days
    }
}

pub fn canonicalize(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `1 - levenshtein(a, b) / max(len(a), len(b))`, 1.0 for two empty names.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
