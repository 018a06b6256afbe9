// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern Cortex
//!
//! Learns reusable execution patterns from observed actions and tracks how
//! far each one can be trusted.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Mine, score, store, apply and revise execution patterns
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`domain`] | patterns, observations, thresholds, embeddings, config, errors, events, repository traits |
//! | [`application`] | miner, clusterer, scorer, pattern store, confidence updater, thresholds, vector index, pipeline |
//! | [`infrastructure`] | in-memory and SQLite repositories, hashing embedder, observers, tracing setup |
//!
//! [`LearningPipeline`](application::LearningPipeline) is the entry point.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
pub use application::*;
pub use infrastructure::*;
