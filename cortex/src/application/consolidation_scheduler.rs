// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Maintenance Scheduler - Background task for periodic consolidation
//!
//! Runs the pattern consolidation pass on a fixed schedule and, when
//! configured, flushes buffered observations on their own interval.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drives the "sleep cycle" of the engine: merge, prune, decay

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::pattern_store::ConsolidationReport;
use crate::domain::config::MaintenanceConfig;
use crate::domain::error::CortexResult;

/// Work the scheduler drives. Implemented by the pipeline.
#[async_trait]
pub trait ConsolidationTarget: Send + Sync {
    async fn run_consolidation(&self) -> CortexResult<ConsolidationReport>;

    /// Returns the number of candidates extracted.
    async fn run_flush(&self) -> CortexResult<usize>;
}

/// Maintenance Scheduler - Background task
pub struct MaintenanceScheduler {
    target: Arc<dyn ConsolidationTarget>,
    config: MaintenanceConfig,
    shutdown_token: CancellationToken,
}

impl MaintenanceScheduler {
    pub fn new(target: Arc<dyn ConsolidationTarget>, config: MaintenanceConfig) -> Self {
        Self::with_token(target, config, CancellationToken::new())
    }

    /// Stop when `shutdown_token` (or a parent of it) is cancelled.
    pub fn with_token(
        target: Arc<dyn ConsolidationTarget>,
        config: MaintenanceConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            target,
            config,
            shutdown_token,
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the scheduler background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Maintenance scheduler is disabled");
            return;
        }

        let period = self.config.schedule.period();
        info!(
            period_seconds = period.as_secs(),
            flush_interval_seconds = ?self.config.flush_interval_seconds,
            "Starting maintenance scheduler"
        );

        let mut consolidation_tick = interval(period);
        consolidation_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick of an interval completes immediately
        consolidation_tick.tick().await;

        // a disabled flush timer still needs a future for select!, it just never fires
        let flush_period = self
            .config
            .flush_interval_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        let mut flush_tick = interval(flush_period.unwrap_or(period));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        flush_tick.tick().await;

        loop {
            tokio::select! {
                _ = consolidation_tick.tick() => {
                    debug!("Running scheduled consolidation");
                    self.consolidation_cycle().await;
                }
                _ = flush_tick.tick(), if flush_period.is_some() => {
                    debug!("Running scheduled observation flush");
                    self.flush_cycle().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping maintenance scheduler");
                    break;
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Execute a single consolidation pass. Failures are logged, never fatal.
    async fn consolidation_cycle(&self) -> Option<ConsolidationReport> {
        match self.target.run_consolidation().await {
            Ok(report) => {
                info!(
                    merged = report.merged,
                    pruned = report.pruned,
                    decayed = report.decayed,
                    interrupted = report.interrupted,
                    "Scheduled consolidation completed"
                );
                Some(report)
            }
            Err(e) => {
                warn!("Scheduled consolidation failed: {}", e);
                None
            }
        }
    }

    async fn flush_cycle(&self) -> Option<usize> {
        match self.target.run_flush().await {
            Ok(candidates) => Some(candidates),
            Err(e) => {
                warn!("Scheduled observation flush failed: {}", e);
                None
            }
        }
    }
}
