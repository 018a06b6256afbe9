// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sequence Miner
//!
//! Extracts frequent contiguous action n-grams from a batch of observations.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** First stage of extraction; feeds candidates to the quality scorer
//!
//! Observations are grouped by task id (groups in order of first appearance,
//! arrival order inside a group). Every task of length `L >= 2` contributes its
//! n-grams for `n = min_ngram..=min(max_ngram, L)`. An n-gram instance is
//! successful only if every member action succeeded. Qualifying sequences
//! (support `>= min_support`, success rate `>= min_confidence`) are returned by
//! descending support, ties kept in order of first discovery.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::domain::candidate::{CandidateInstance, CandidateOrigin, CandidatePattern, ContextKey};
use crate::domain::config::MiningConfig;
use crate::domain::observation::Observation;

pub struct SequenceMiner {
    config: MiningConfig,
}

struct SequenceStats {
    actions: Vec<String>,
    occurrences: usize,
    successes: usize,
    total_duration_ms: f64,
    instances: Vec<CandidateInstance>,
    contexts: BTreeSet<ContextKey>,
}

impl SequenceMiner {
    pub fn new(config: MiningConfig) -> Self {
        Self { config }
    }

    pub fn mine(&self, observations: &[Observation]) -> Vec<CandidatePattern> {
        if observations.is_empty() {
            return Vec::new();
        }

        let tasks = group_by_task(observations);

        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        let mut stats: Vec<SequenceStats> = Vec::new();

        for task in &tasks {
            if task.len() < 2 || task.len() < self.config.min_ngram {
                continue;
            }
            let longest = self.config.max_ngram.min(task.len());

            for n in self.config.min_ngram..=longest {
                for window in task.windows(n) {
                    let actions: Vec<String> = window.iter().map(|o| o.action.clone()).collect();
                    let slot = match index.get(&actions) {
                        Some(slot) => *slot,
                        None => {
                            index.insert(actions.clone(), stats.len());
                            stats.push(SequenceStats {
                                actions,
                                occurrences: 0,
                                successes: 0,
                                total_duration_ms: 0.0,
                                instances: Vec::new(),
                                contexts: BTreeSet::new(),
                            });
                            stats.len() - 1
                        }
                    };
                    record_window(&mut stats[slot], window);
                }
            }
        }

        let mut sequences: Vec<CandidatePattern> = stats
            .into_iter()
            .filter_map(|s| self.qualify(s))
            .collect();

        // `sort_by` is stable, so equal support keeps discovery order
        sequences.sort_by(|a, b| b.support.cmp(&a.support));

        debug!(
            observations = observations.len(),
            tasks = tasks.len(),
            sequences = sequences.len(),
            "Sequence mining completed"
        );

        sequences
    }

    fn qualify(&self, stats: SequenceStats) -> Option<CandidatePattern> {
        if stats.occurrences == 0 || stats.occurrences < self.config.min_support {
            return None;
        }
        let success_rate = stats.successes as f64 / stats.occurrences as f64;
        if success_rate < self.config.min_confidence {
            return None;
        }

        Some(CandidatePattern {
            origin: CandidateOrigin::Sequence,
            actions: stats.actions,
            support: stats.occurrences,
            success_rate,
            average_duration_ms: stats.total_duration_ms / stats.occurrences as f64,
            instances: stats.instances,
            contexts: stats.contexts,
        })
    }
}

fn group_by_task(observations: &[Observation]) -> Vec<Vec<&Observation>> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Observation>> = Vec::new();

    for observation in observations {
        let task_id = observation.context.task_id.as_str();
        match positions.get(task_id) {
            Some(position) => groups[*position].push(observation),
            None => {
                positions.insert(task_id, groups.len());
                groups.push(vec![observation]);
            }
        }
    }

    groups
}

fn record_window(stats: &mut SequenceStats, window: &[&Observation]) {
    let success = window.iter().all(|o| o.succeeded());
    let duration_ms: f64 = window.iter().map(|o| o.duration_ms).sum();
    let first = window[0];

    stats.occurrences += 1;
    if success {
        stats.successes += 1;
    }
    stats.total_duration_ms += duration_ms;

    for observation in window {
        stats.contexts.insert(ContextKey {
            agent_id: observation.context.agent_id.clone(),
            working_directory: observation.context.working_directory.clone(),
        });
    }

    stats.instances.push(CandidateInstance {
        task_id: first.context.task_id.clone(),
        agent_id: first.context.agent_id.clone(),
        working_directory: first.context.working_directory.clone(),
        success,
        duration_ms,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::{ExecutionContext, ObservationOutcome};
    use std::collections::BTreeMap;

    fn obs(task: &str, action: &str, success: bool) -> Observation {
        let outcome = if success {
            ObservationOutcome::succeeded()
        } else {
            ObservationOutcome::failed("boom")
        };
        Observation::new(
            action,
            BTreeMap::new(),
            outcome,
            50.0,
            ExecutionContext::new(task, "coder", "/repo"),
        )
    }

    fn miner() -> SequenceMiner {
        SequenceMiner::new(MiningConfig::default())
    }

    #[test]
    fn test_empty_input() {
        assert!(miner().mine(&[]).is_empty());
    }

    #[test]
    fn test_single_observation_yields_nothing() {
        assert!(miner().mine(&[obs("t1", "Read", true)]).is_empty());
    }

    #[test]
    fn test_repeated_pair_across_tasks() {
        let batch: Vec<Observation> = (0..10)
            .flat_map(|i| {
                let task = format!("task-{}", i);
                vec![obs(&task, "Read", true), obs(&task, "Grep", true)]
            })
            .collect();

        let sequences = miner().mine(&batch);
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].actions, vec!["Read", "Grep"]);
        assert_eq!(sequences[0].support, 10);
        assert_eq!(sequences[0].success_rate, 1.0);
        assert_eq!(sequences[0].instances.len(), 10);
        assert_eq!(sequences[0].average_duration_ms, 100.0);
    }

    #[test]
    fn test_below_support_is_dropped() {
        let batch = vec![
            obs("a", "Read", true),
            obs("a", "Edit", true),
            obs("b", "Read", true),
            obs("b", "Edit", true),
        ];
        assert!(miner().mine(&batch).is_empty());
    }

    #[test]
    fn test_failed_member_fails_instance() {
        let mut batch = Vec::new();
        for i in 0..4 {
            let task = format!("t{}", i);
            batch.push(obs(&task, "Read", true));
            batch.push(obs(&task, "Bash", i < 2));
        }
        // 2 of 4 instances succeed -> 0.5 < 0.7
        assert!(miner().mine(&batch).is_empty());
    }

    #[test]
    fn test_sorted_by_support_then_discovery() {
        let mut batch = Vec::new();
        for i in 0..3 {
            let task = format!("x{}", i);
            batch.push(obs(&task, "Glob", true));
            batch.push(obs(&task, "Read", true));
        }
        for i in 0..5 {
            let task = format!("y{}", i);
            batch.push(obs(&task, "Read", true));
            batch.push(obs(&task, "Edit", true));
        }
        for i in 0..3 {
            let task = format!("z{}", i);
            batch.push(obs(&task, "Bash", true));
            batch.push(obs(&task, "Test", true));
        }

        let sequences = miner().mine(&batch);
        let names: Vec<String> = sequences.iter().map(|s| s.display_name()).collect();
        assert_eq!(names, vec!["Read -> Edit", "Glob -> Read", "Bash -> Test"]);
    }

    #[test]
    fn test_interleaved_tasks_keep_arrival_order() {
        let mut batch = Vec::new();
        for i in 0..3 {
            batch.push(obs(&format!("t{}", i), "Read", true));
        }
        for i in 0..3 {
            batch.push(obs(&format!("t{}", i), "Grep", true));
        }
        let sequences = miner().mine(&batch);
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].actions, vec!["Read", "Grep"]);
    }

    #[test]
    fn test_longer_ngrams_are_bounded() {
        let mut batch = Vec::new();
        for i in 0..3 {
            let task = format!("t{}", i);
            for action in ["A", "B", "C", "D", "E"] {
                batch.push(obs(&task, action, true));
            }
        }
        let sequences = miner().mine(&batch);
        assert!(sequences.iter().all(|s| (2..=4).contains(&s.actions.len())));
        // 4 bigrams + 3 trigrams + 2 four-grams
        assert_eq!(sequences.len(), 9);
    }
}
