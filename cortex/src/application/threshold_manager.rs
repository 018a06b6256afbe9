// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Adaptive Threshold Manager
//!
//! Maintains one [`AdaptiveThreshold`] row per `(agent type, file type)` key.
//! Rows are created lazily on the first recorded outcome and updated on every
//! outcome under a per-key lock. Reads return the strict default until a row
//! has at least `min_sample_size` samples.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::config::ThresholdConfig;
use crate::domain::error::{CortexError, CortexResult};
use crate::domain::repository::ThresholdRepository;
use crate::domain::threshold::{AdaptiveThreshold, ThresholdKey, ThresholdSample};

pub struct ThresholdManager {
    repository: Arc<dyn ThresholdRepository>,
    config: ThresholdConfig,
    locks: DashMap<ThresholdKey, Arc<Mutex<()>>>,
}

impl ThresholdManager {
    pub fn new(repository: Arc<dyn ThresholdRepository>, config: ThresholdConfig) -> Self {
        Self {
            repository,
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &ThresholdKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fold one outcome into the threshold for `key`.
    pub async fn record(&self, key: ThresholdKey, sample: ThresholdSample) -> CortexResult<AdaptiveThreshold> {
        if !sample.truth_score.is_finite() || !sample.required_threshold.is_finite() {
            return Err(CortexError::validation(format!(
                "threshold sample for {} must carry finite scores",
                key
            )));
        }

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let mut threshold = match self.repository.find(&key).await? {
            Some(existing) => existing,
            None => AdaptiveThreshold::new(key.clone(), self.config.default_threshold, self.config.base_margin),
        };

        threshold.apply(
            &sample,
            self.config.learning_rate,
            self.config.base_margin,
            self.config.margin_saturation,
        );
        self.repository.save(&threshold).await?;

        debug!(
            key = %key,
            adjusted = threshold.adjusted_threshold,
            samples = threshold.sample_size,
            "Adaptive threshold updated"
        );

        Ok(threshold)
    }

    /// Effective threshold for a context.
    ///
    /// Looks up the exact key, then the agent's "any file type" row. A row
    /// with fewer than `min_sample_size` samples yields the strict default.
    pub async fn get_threshold(&self, agent_type: &str, file_type: Option<&str>) -> CortexResult<f64> {
        let row = match self.find_row(agent_type, file_type).await? {
            Some(row) => row,
            None => return Ok(self.config.default_threshold),
        };

        if row.sample_size >= self.config.min_sample_size {
            Ok(row.adjusted_threshold)
        } else {
            Ok(self.config.default_threshold)
        }
    }

    pub async fn get(&self, key: &ThresholdKey) -> CortexResult<Option<AdaptiveThreshold>> {
        Ok(self.repository.find(key).await?)
    }

    pub async fn list(&self) -> CortexResult<Vec<AdaptiveThreshold>> {
        Ok(self.repository.list_all().await?)
    }

    async fn find_row(&self, agent_type: &str, file_type: Option<&str>) -> CortexResult<Option<AdaptiveThreshold>> {
        let exact = ThresholdKey::new(agent_type, file_type);
        if let Some(row) = self.repository.find(&exact).await? {
            return Ok(Some(row));
        }
        if file_type.is_some() {
            return Ok(self.repository.find(&ThresholdKey::any_file(agent_type)).await?);
        }
        Ok(None)
    }
}
