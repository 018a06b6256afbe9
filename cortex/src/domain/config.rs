// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Configuration
//!
//! [`CortexConfig`] groups every tunable of the learning engine into one YAML
//! document. Every field has a serde default, so an empty file (or no file at
//! all) yields the stock behaviour.
//!
//! ```yaml
//! mining:
//!   min_support: 3
//!   min_confidence: 0.7
//! store:
//!   merge_similarity: 0.95
//! maintenance:
//!   schedule: daily
//! logging:
//!   level: info
//!   format: json
//! ```
//!
//! ## Discovery
//!
//! 1. `CORTEX_CONFIG_PATH` environment variable
//! 2. `./cortex-config.yaml`
//! 3. `~/.cortex/config.yaml`
//! 4. `/etc/cortex/config.yaml`
//!
//! Environment overrides (`CORTEX_*`) are applied after loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::embedding::DistanceMetric;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub mining: MiningConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub confidence: ConfidenceConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub vector: VectorConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Frequent-sequence mining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_min_support")]
    pub min_support: usize,

    #[serde(default = "default_mining_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_min_ngram")]
    pub min_ngram: usize,

    #[serde(default = "default_max_ngram")]
    pub max_ngram: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            min_confidence: default_mining_confidence(),
            min_ngram: default_min_ngram(),
            max_ngram: default_max_ngram(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// A cluster is kept only when its success rate is strictly above this.
    #[serde(default = "default_cluster_success_rate")]
    pub min_success_rate: f64,

    /// Minimum share of members an action needs to count as dominant.
    #[serde(default = "default_dominant_share")]
    pub dominant_action_share: f64,

    #[serde(default = "default_max_dominant_actions")]
    pub max_dominant_actions: usize,

    /// Fixed RNG seed; `None` seeds from the OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            num_clusters: default_num_clusters(),
            max_iterations: default_max_iterations(),
            min_success_rate: default_cluster_success_rate(),
            dominant_action_share: default_dominant_share(),
            max_dominant_actions: default_max_dominant_actions(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_min_quality")]
    pub min_quality: f64,

    #[serde(default = "default_consistency_weight")]
    pub consistency_weight: f64,

    #[serde(default = "default_impact_weight")]
    pub impact_weight: f64,

    #[serde(default = "default_generalizability_weight")]
    pub generalizability_weight: f64,

    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            consistency_weight: default_consistency_weight(),
            impact_weight: default_impact_weight(),
            generalizability_weight: default_generalizability_weight(),
            frequency_weight: default_frequency_weight(),
        }
    }
}

impl QualityConfig {
    fn weight_sum(&self) -> f64 {
        self.consistency_weight + self.impact_weight + self.generalizability_weight + self.frequency_weight
    }
}

/// Merge, prune and decay behaviour of the pattern store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_merge_similarity")]
    pub merge_similarity: f64,

    #[serde(default = "default_prune_confidence")]
    pub prune_confidence_threshold: f64,

    #[serde(default = "default_prune_usage")]
    pub prune_usage_threshold: u64,

    #[serde(default = "default_prune_age_days")]
    pub prune_age_days: i64,

    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,

    /// Patterns idle for longer than this decay once per consolidation pass.
    #[serde(default = "default_decay_idle_days")]
    pub decay_idle_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            merge_similarity: default_merge_similarity(),
            prune_confidence_threshold: default_prune_confidence(),
            prune_usage_threshold: default_prune_usage(),
            prune_age_days: default_prune_age_days(),
            decay_factor: default_decay_factor(),
            decay_idle_days: default_decay_idle_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Evidence multiplier for partial outcomes.
    #[serde(default = "default_partial_weight")]
    pub partial_weight: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            partial_weight: default_partial_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_strict_threshold")]
    pub default_threshold: f64,

    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_base_margin")]
    pub base_margin: f64,

    /// Sample size at which the interval margin reaches zero.
    #[serde(default = "default_margin_saturation")]
    pub margin_saturation: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_strict_threshold(),
            min_sample_size: default_min_sample_size(),
            learning_rate: default_learning_rate(),
            base_margin: default_base_margin(),
            margin_saturation: default_margin_saturation(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_vector_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_true")]
    pub compression: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default)]
    pub distance: DistanceMetric,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            model: default_vector_model(),
            dimensions: default_dimensions(),
            compression: true,
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl(),
            distance: DistanceMetric::default(),
        }
    }
}

impl VectorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_buffer_size")]
    pub observation_buffer_size: usize,

    /// Minimum confidence a pattern needs for `apply_best_pattern` to apply it.
    #[serde(default = "default_min_confidence_threshold")]
    pub min_confidence_threshold: f64,

    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: i64,

    #[serde(default = "default_true")]
    pub vector_fallback: bool,

    #[serde(default = "default_vector_min_similarity")]
    pub vector_min_similarity: f64,

    #[serde(default = "default_working_memory_ttl")]
    pub working_memory_ttl_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            observation_buffer_size: default_buffer_size(),
            min_confidence_threshold: default_min_confidence_threshold(),
            recency_window_days: default_recency_window_days(),
            vector_fallback: true,
            vector_min_similarity: default_vector_min_similarity(),
            working_memory_ttl_seconds: default_working_memory_ttl(),
        }
    }
}

/// How often the background consolidation pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationSchedule {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Every { seconds: u64 },
}

impl ConsolidationSchedule {
    pub fn period(&self) -> Duration {
        match self {
            ConsolidationSchedule::Hourly => Duration::from_secs(60 * 60),
            ConsolidationSchedule::Daily => Duration::from_secs(24 * 60 * 60),
            ConsolidationSchedule::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            ConsolidationSchedule::Every { seconds } => Duration::from_secs((*seconds).max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub schedule: ConsolidationSchedule,

    /// Periodic buffer flush; disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_interval_seconds: Option<u64>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: ConsolidationSchedule::default(),
            flush_interval_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "compact")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_support() -> usize {
    3
}

fn default_mining_confidence() -> f64 {
    0.7
}

fn default_min_ngram() -> usize {
    2
}

fn default_max_ngram() -> usize {
    4
}

fn default_num_clusters() -> usize {
    5
}

fn default_max_iterations() -> usize {
    100
}

fn default_cluster_success_rate() -> f64 {
    0.7
}

fn default_dominant_share() -> f64 {
    0.2
}

fn default_max_dominant_actions() -> usize {
    4
}

fn default_min_quality() -> f64 {
    0.6
}

fn default_consistency_weight() -> f64 {
    0.4
}

fn default_impact_weight() -> f64 {
    0.3
}

fn default_generalizability_weight() -> f64 {
    0.2
}

fn default_frequency_weight() -> f64 {
    0.1
}

fn default_merge_similarity() -> f64 {
    0.95
}

fn default_prune_confidence() -> f64 {
    0.3
}

fn default_prune_usage() -> u64 {
    10
}

fn default_prune_age_days() -> i64 {
    30
}

fn default_decay_factor() -> f64 {
    0.95
}

fn default_decay_idle_days() -> i64 {
    30
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_partial_weight() -> f64 {
    0.5
}

fn default_strict_threshold() -> f64 {
    0.95
}

fn default_min_sample_size() -> u64 {
    10
}

fn default_base_margin() -> f64 {
    0.05
}

fn default_margin_saturation() -> u64 {
    100
}

fn default_vector_model() -> String {
    "cortex-hash-v1".to_string()
}

fn default_dimensions() -> usize {
    256
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_buffer_size() -> usize {
    100
}

fn default_min_confidence_threshold() -> f64 {
    0.7
}

fn default_recency_window_days() -> i64 {
    90
}

fn default_vector_min_similarity() -> f64 {
    0.7
}

fn default_working_memory_ttl() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl CortexConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CORTEX_CONFIG_PATH environment variable
    /// 2. ./cortex-config.yaml (working directory)
    /// 3. ~/.cortex/config.yaml (user home)
    /// 4. /etc/cortex/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CORTEX_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./cortex-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cortex").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/cortex/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CORTEX_*` environment variable overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = env_override::<usize>("CORTEX_MIN_SUPPORT") {
            self.mining.min_support = val;
        }
        if let Some(val) = env_override::<f64>("CORTEX_MIN_CONFIDENCE") {
            self.mining.min_confidence = val;
            self.pipeline.min_confidence_threshold = val;
        }
        if let Some(val) = env_override::<usize>("CORTEX_BUFFER_SIZE") {
            self.pipeline.observation_buffer_size = val;
        }
        if let Some(val) = env_override::<f64>("CORTEX_MERGE_SIMILARITY") {
            self.store.merge_similarity = val;
        }
        if let Some(val) = env_override::<u64>("CORTEX_CLUSTER_SEED") {
            self.clustering.seed = Some(val);
        }
        if let Ok(val) = std::env::var("CORTEX_LOG_LEVEL") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: CORTEX_LOG_LEVEL={}", val);
                self.logging.level = val;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let probabilities = [
            ("mining.min_confidence", self.mining.min_confidence),
            ("clustering.min_success_rate", self.clustering.min_success_rate),
            ("clustering.dominant_action_share", self.clustering.dominant_action_share),
            ("quality.min_quality", self.quality.min_quality),
            ("store.merge_similarity", self.store.merge_similarity),
            ("store.prune_confidence_threshold", self.store.prune_confidence_threshold),
            ("store.decay_factor", self.store.decay_factor),
            ("confidence.learning_rate", self.confidence.learning_rate),
            ("confidence.partial_weight", self.confidence.partial_weight),
            ("thresholds.default_threshold", self.thresholds.default_threshold),
            ("thresholds.learning_rate", self.thresholds.learning_rate),
            ("thresholds.base_margin", self.thresholds.base_margin),
            ("pipeline.min_confidence_threshold", self.pipeline.min_confidence_threshold),
        ];
        for (name, value) in probabilities {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, value);
            }
        }

        if !(-1.0..=1.0).contains(&self.pipeline.vector_min_similarity) {
            anyhow::bail!(
                "pipeline.vector_min_similarity must be within [-1, 1], got {}",
                self.pipeline.vector_min_similarity
            );
        }

        if self.mining.min_support == 0 {
            anyhow::bail!("mining.min_support must be at least 1");
        }
        if self.mining.min_ngram < 2 {
            anyhow::bail!("mining.min_ngram must be at least 2, got {}", self.mining.min_ngram);
        }
        if self.mining.min_ngram > self.mining.max_ngram {
            anyhow::bail!(
                "mining.min_ngram ({}) cannot exceed mining.max_ngram ({})",
                self.mining.min_ngram,
                self.mining.max_ngram
            );
        }
        if self.clustering.num_clusters == 0 {
            anyhow::bail!("clustering.num_clusters must be at least 1");
        }
        if self.clustering.max_iterations == 0 {
            anyhow::bail!("clustering.max_iterations must be at least 1");
        }

        let weights = self.quality.weight_sum();
        if (weights - 1.0).abs() > 1e-6 {
            anyhow::bail!("quality weights must sum to 1.0, got {}", weights);
        }

        if self.store.prune_age_days < 0 || self.store.decay_idle_days < 0 {
            anyhow::bail!("store day thresholds cannot be negative");
        }
        if self.pipeline.observation_buffer_size == 0 {
            anyhow::bail!("pipeline.observation_buffer_size must be at least 1");
        }
        if self.pipeline.recency_window_days <= 0 {
            anyhow::bail!("pipeline.recency_window_days must be positive");
        }
        if self.vector.dimensions == 0 {
            anyhow::bail!("vector.dimensions must be at least 1");
        }
        if self.vector.cache_capacity == 0 {
            anyhow::bail!("vector.cache_capacity must be at least 1");
        }
        if self.vector.model.trim().is_empty() {
            anyhow::bail!("vector.model cannot be empty");
        }

        match self.logging.format.as_str() {
            "json" | "compact" | "text" => {}
            other => anyhow::bail!("logging.format must be 'json' or 'compact', got '{}'", other),
        }

        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            tracing::info!("Environment override: {}={}", name, raw);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", name, raw);
            None
        }
    }
}
