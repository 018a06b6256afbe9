// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adaptive acceptance thresholds keyed by (agent type, file type).
//!
//! Each row is smoothed with an exponential moving average over observed
//! outcomes and carries a symmetric confidence interval that narrows as the
//! sample size grows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThresholdKey {
    pub agent_type: String,
    /// `None` means "any file type".
    pub file_type: Option<String>,
}

impl ThresholdKey {
    pub fn new(agent_type: impl Into<String>, file_type: Option<&str>) -> Self {
        Self {
            agent_type: agent_type.into(),
            file_type: file_type.map(str::to_string),
        }
    }

    pub fn any_file(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            file_type: None,
        }
    }
}

impl fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.file_type.as_deref().unwrap_or("*"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// One verification result fed into the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSample {
    pub truth_score: f64,
    pub required_threshold: f64,
    pub passed: bool,
}

impl ThresholdSample {
    pub fn target(&self) -> f64 {
        if self.passed {
            self.truth_score
        } else {
            self.required_threshold
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveThreshold {
    pub key: ThresholdKey,
    pub base_threshold: f64,
    pub adjusted_threshold: f64,
    pub interval: ConfidenceInterval,
    pub sample_size: u64,
    pub last_updated: DateTime<Utc>,
}

impl AdaptiveThreshold {
    pub fn new(key: ThresholdKey, base_threshold: f64, base_margin: f64) -> Self {
        let base = base_threshold.clamp(0.0, 1.0);
        Self {
            key,
            base_threshold: base,
            adjusted_threshold: base,
            interval: ConfidenceInterval {
                low: (base - base_margin).clamp(0.0, 1.0),
                high: (base + base_margin).clamp(0.0, 1.0),
            },
            sample_size: 0,
            last_updated: Utc::now(),
        }
    }

    /// Fold one sample into the moving average.
    ///
    /// `alpha` is the smoothing factor; the interval margin is
    /// `base_margin * (1 - min(1, n / saturation))`.
    pub fn apply(&mut self, sample: &ThresholdSample, alpha: f64, base_margin: f64, saturation: u64) {
        self.sample_size += 1;

        let target = sample.target().clamp(0.0, 1.0);
        self.adjusted_threshold =
            (alpha * target + (1.0 - alpha) * self.adjusted_threshold).clamp(0.0, 1.0);

        let fill = if saturation == 0 {
            1.0
        } else {
            (self.sample_size as f64 / saturation as f64).min(1.0)
        };
        let margin = base_margin * (1.0 - fill);
        self.interval = ConfidenceInterval {
            low: (self.adjusted_threshold - margin).clamp(0.0, 1.0),
            high: (self.adjusted_threshold + margin).clamp(0.0, 1.0),
        };
        self.last_updated = Utc::now();
    }
}
