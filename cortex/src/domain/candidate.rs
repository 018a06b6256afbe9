// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transient mining output: candidate patterns, their supporting instances,
//! the per-batch population baseline and the quality score computed from both.
//! None of these types are persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::observation::Observation;

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    Sequence,
    Cluster,
}

/// One occurrence of a candidate inside the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateInstance {
    pub task_id: String,
    pub agent_id: String,
    pub working_directory: String,
    pub success: bool,
    pub duration_ms: f64,
}

impl CandidateInstance {
    pub fn outcome(&self) -> f64 {
        if self.success {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub agent_id: String,
    pub working_directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePattern {
    pub origin: CandidateOrigin,
    pub actions: Vec<String>,
    pub instances: Vec<CandidateInstance>,
    pub support: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub contexts: BTreeSet<ContextKey>,
}

impl CandidatePattern {
    pub fn distinct_agents(&self) -> usize {
        self.contexts
            .iter()
            .map(|c| c.agent_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn distinct_directories(&self) -> usize {
        self.contexts
            .iter()
            .map(|c| c.working_directory.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Human name derived from the action chain.
    pub fn display_name(&self) -> String {
        self.actions.join(" -> ")
    }

    /// Whether every one of `actions` already appears in this candidate.
    pub fn covers(&self, actions: &[String]) -> bool {
        !actions.is_empty() && actions.iter().all(|a| self.actions.contains(a))
    }
}

/// Population statistics of one extraction batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationBaseline {
    pub mean_duration_ms: f64,
    pub mean_success_rate: f64,
    pub duration_std_dev: f64,
}

impl PopulationBaseline {
    pub fn from_observations(observations: &[Observation]) -> Self {
        if observations.is_empty() {
            return Self {
                mean_duration_ms: 0.0,
                mean_success_rate: 0.0,
                duration_std_dev: 0.0,
            };
        }

        let n = observations.len() as f64;
        let mean_duration_ms = observations.iter().map(|o| o.duration_ms).sum::<f64>() / n;
        let mean_success_rate = observations.iter().filter(|o| o.succeeded()).count() as f64 / n;
        let variance = observations
            .iter()
            .map(|o| (o.duration_ms - mean_duration_ms).powi(2))
            .sum::<f64>()
            / n;

        Self {
            mean_duration_ms,
            mean_success_rate,
            duration_std_dev: variance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub consistency: f64,
    pub impact: f64,
    pub generalizability: f64,
    pub frequency: f64,
    pub overall: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::{ExecutionContext, ObservationOutcome};
    use std::collections::BTreeMap;

    #[test]
    fn test_baseline() {
        let ctx = ExecutionContext::new("t", "a", "/w");
        let obs = vec![
            Observation::new("Read", BTreeMap::new(), ObservationOutcome::succeeded(), 100.0, ctx.clone()),
            Observation::new("Read", BTreeMap::new(), ObservationOutcome::failed("x"), 300.0, ctx),
        ];
        let baseline = PopulationBaseline::from_observations(&obs);
        assert_eq!(baseline.mean_duration_ms, 200.0);
        assert_eq!(baseline.mean_success_rate, 0.5);
        assert_eq!(baseline.duration_std_dev, 100.0);
    }

    #[test]
    fn test_empty_baseline() {
        let baseline = PopulationBaseline::from_observations(&[]);
        assert_eq!(baseline.mean_success_rate, 0.0);
    }
}
