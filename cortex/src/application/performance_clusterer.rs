// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Performance Clusterer
//!
//! Groups a flat batch of observations into behaviour clusters with k-means
//! over a fixed four-dimensional feature vector and keeps the clusters that
//! perform well.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Second extraction stage, run next to the sequence miner
//!
//! Features per observation:
//!
//! | # | Feature | Definition |
//! |---|---------|------------|
//! | 0 | duration | `clamp(duration_ms / 10_000, 0, 1)` |
//! | 1 | success | `1.0` or `0.0` |
//! | 2 | complexity | `min(1, parameter_count / 10)` |
//! | 3 | parallelism | `min(1, active_pattern_count / 10)` |
//!
//! Initial centroids are distinct random data points drawn from a seedable
//! RNG. Iteration stops when no assignment changes or after `max_iterations`.
//! An emptied centroid is reseeded to a random data point.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::domain::candidate::{CandidateInstance, CandidateOrigin, CandidatePattern, ContextKey};
use crate::domain::config::ClusteringConfig;
use crate::domain::observation::Observation;

const FEATURES: usize = 4;
const DURATION_CEILING_MS: f64 = 10_000.0;
const SATURATION_COUNT: f64 = 10.0;

pub type FeatureVector = [f64; FEATURES];

/// A retained behaviour cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorCluster {
    pub centroid: FeatureVector,
    pub member_count: usize,
    pub success_rate: f64,
    pub mean_duration_ms: f64,
    /// Most frequent action names, most frequent first.
    pub dominant_actions: Vec<String>,
    pub instances: Vec<CandidateInstance>,
    pub contexts: BTreeSet<ContextKey>,
}

impl BehaviorCluster {
    pub fn to_candidate(&self) -> CandidatePattern {
        CandidatePattern {
            origin: CandidateOrigin::Cluster,
            actions: self.dominant_actions.clone(),
            instances: self.instances.clone(),
            support: self.member_count,
            success_rate: self.success_rate,
            average_duration_ms: self.mean_duration_ms,
            contexts: self.contexts.clone(),
        }
    }
}

pub struct PerformanceClusterer {
    config: ClusteringConfig,
    rng: Mutex<StdRng>,
}

impl PerformanceClusterer {
    /// Seeds from `config.seed` when set, otherwise from the OS.
    pub fn new(config: ClusteringConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn with_seed(config: ClusteringConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn cluster(&self, observations: &[Observation]) -> Vec<BehaviorCluster> {
        let k = self.config.num_clusters;
        if k == 0 || observations.len() < k {
            return Vec::new();
        }

        let points: Vec<FeatureVector> = observations.iter().map(features).collect();
        let assignments = self.kmeans(&points, k);

        let mut clusters: Vec<BehaviorCluster> = (0..k)
            .filter_map(|c| {
                let members: Vec<usize> = assignments
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| **a == c)
                    .map(|(i, _)| i)
                    .collect();
                if members.is_empty() {
                    None
                } else {
                    Some(self.summarize(&members, &points, observations))
                }
            })
            .filter(|cluster| cluster.success_rate > self.config.min_success_rate)
            .collect();

        clusters.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            observations = observations.len(),
            k,
            retained = clusters.len(),
            "Performance clustering completed"
        );

        clusters
    }

    fn kmeans(&self, points: &[FeatureVector], k: usize) -> Vec<usize> {
        let n = points.len();
        let mut rng = self.rng.lock();

        let mut centroids: Vec<FeatureVector> = rand::seq::index::sample(&mut *rng, n, k)
            .iter()
            .map(|i| points[i])
            .collect();
        let mut assignments = vec![usize::MAX; n];

        for iteration in 0..self.config.max_iterations {
            let mut changed = false;
            for (i, point) in points.iter().enumerate() {
                let nearest = nearest_centroid(point, &centroids);
                if nearest != assignments[i] {
                    assignments[i] = nearest;
                    changed = true;
                }
            }

            if !changed {
                debug!(iteration, "K-means converged");
                break;
            }

            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&FeatureVector> = points
                    .iter()
                    .zip(assignments.iter())
                    .filter(|(_, a)| **a == c)
                    .map(|(p, _)| p)
                    .collect();

                *centroid = if members.is_empty() {
                    points[rng.random_range(0..n)]
                } else {
                    mean(&members)
                };
            }
        }

        assignments
    }

    fn summarize(
        &self,
        members: &[usize],
        points: &[FeatureVector],
        observations: &[Observation],
    ) -> BehaviorCluster {
        let count = members.len() as f64;
        let member_points: Vec<&FeatureVector> = members.iter().map(|i| &points[*i]).collect();
        let centroid = mean(&member_points);

        let success_rate = member_points.iter().map(|p| p[1]).sum::<f64>() / count;
        let mean_duration_ms = members
            .iter()
            .map(|i| observations[*i].duration_ms)
            .sum::<f64>()
            / count;

        let mut action_counts: HashMap<&str, usize> = HashMap::new();
        let mut instances = Vec::with_capacity(members.len());
        let mut contexts = BTreeSet::new();

        for i in members {
            let observation = &observations[*i];
            *action_counts.entry(observation.action.as_str()).or_insert(0) += 1;
            instances.push(CandidateInstance {
                task_id: observation.context.task_id.clone(),
                agent_id: observation.context.agent_id.clone(),
                working_directory: observation.context.working_directory.clone(),
                success: observation.succeeded(),
                duration_ms: observation.duration_ms,
            });
            contexts.insert(ContextKey {
                agent_id: observation.context.agent_id.clone(),
                working_directory: observation.context.working_directory.clone(),
            });
        }

        let mut ranked: Vec<(&str, usize)> = action_counts
            .into_iter()
            .filter(|(_, c)| *c as f64 / count >= self.config.dominant_action_share)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        BehaviorCluster {
            centroid,
            member_count: members.len(),
            success_rate,
            mean_duration_ms,
            dominant_actions: ranked
                .into_iter()
                .take(self.config.max_dominant_actions)
                .map(|(a, _)| a.to_string())
                .collect(),
            instances,
            contexts,
        }
    }
}

pub fn features(observation: &Observation) -> FeatureVector {
    let duration = if observation.duration_ms.is_finite() {
        (observation.duration_ms / DURATION_CEILING_MS).clamp(0.0, 1.0)
    } else {
        1.0
    };
    [
        duration,
        if observation.succeeded() { 1.0 } else { 0.0 },
        (observation.parameters.len() as f64 / SATURATION_COUNT).min(1.0),
        (observation.context.active_pattern_ids.len() as f64 / SATURATION_COUNT).min(1.0),
    ]
}

fn squared_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the closest centroid; the lowest index wins ties.
fn nearest_centroid(point: &FeatureVector, centroids: &[FeatureVector]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

fn mean(points: &[&FeatureVector]) -> FeatureVector {
    let mut sum = [0.0; FEATURES];
    for point in points {
        for (s, v) in sum.iter_mut().zip(point.iter()) {
            *s += v;
        }
    }
    let n = points.len().max(1) as f64;
    sum.map(|s| s / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::{ExecutionContext, ObservationOutcome};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn obs(action: &str, success: bool, duration_ms: f64, params: usize) -> Observation {
        let mut parameters = BTreeMap::new();
        for i in 0..params {
            parameters.insert(format!("p{}", i), json!(i));
        }
        let outcome = if success {
            ObservationOutcome::succeeded()
        } else {
            ObservationOutcome::failed("err")
        };
        Observation::new(
            action,
            parameters,
            outcome,
            duration_ms,
            ExecutionContext::new("t", "coder", "/repo"),
        )
    }

    fn config(k: usize) -> ClusteringConfig {
        ClusteringConfig {
            num_clusters: k,
            ..ClusteringConfig::default()
        }
    }

    #[test]
    fn test_features() {
        let f = features(&obs("Read", true, 25_000.0, 15));
        assert_eq!(f, [1.0, 1.0, 1.0, 0.0]);

        let f = features(&obs("Read", false, 2_500.0, 2));
        assert_eq!(f, [0.25, 0.0, 0.2, 0.0]);
    }

    #[test]
    fn test_requires_k_observations() {
        let clusterer = PerformanceClusterer::with_seed(ClusteringConfig::default(), 1);
        let batch: Vec<Observation> = (0..4).map(|_| obs("Read", true, 10.0, 0)).collect();
        assert!(clusterer.cluster(&batch).is_empty());
    }

    #[test]
    fn test_separates_fast_success_from_slow_failure() {
        let mut batch = Vec::new();
        for _ in 0..10 {
            batch.push(obs("Read", true, 100.0, 1));
        }
        for _ in 0..10 {
            batch.push(obs("Bash", false, 9_000.0, 8));
        }

        let clusterer = PerformanceClusterer::with_seed(config(2), 7);
        let clusters = clusterer.cluster(&batch);

        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.member_count, 10);
        assert_eq!(cluster.success_rate, 1.0);
        assert_eq!(cluster.dominant_actions, vec!["Read"]);
        assert!((cluster.mean_duration_ms - 100.0).abs() < 1e-9);

        let candidate = cluster.to_candidate();
        assert_eq!(candidate.origin, CandidateOrigin::Cluster);
        assert_eq!(candidate.support, 10);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let batch: Vec<Observation> = (0..30)
            .map(|i| obs(if i % 3 == 0 { "Grep" } else { "Read" }, i % 7 != 0, (i * 300) as f64, i % 5))
            .collect();

        let a = PerformanceClusterer::with_seed(ClusteringConfig::default(), 99).cluster(&batch);
        let b = PerformanceClusterer::with_seed(ClusteringConfig::default(), 99).cluster(&batch);
        assert_eq!(a, b);
        for pair in a.windows(2) {
            assert!(pair[0].success_rate >= pair[1].success_rate);
        }
        assert!(a.iter().all(|c| c.success_rate > 0.7));
    }

    #[test]
    fn test_nearest_centroid_prefers_first_on_tie() {
        let centroids = [[0.0; 4], [1.0, 0.0, 0.0, 0.0]];
        assert_eq!(nearest_centroid(&[0.5, 0.0, 0.0, 0.0], &centroids), 0);
    }
}
