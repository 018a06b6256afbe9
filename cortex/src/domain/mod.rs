// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Entities, value objects and contracts of the learning engine.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Patterns, observations, thresholds, embeddings and the
//!   repository/generator traits the application layer depends on

pub mod candidate;
pub mod capability;
pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod observation;
pub mod pattern;
pub mod repository;
pub mod threshold;

pub use candidate::*;
pub use capability::*;
pub use config::*;
pub use embedding::*;
pub use error::*;
pub use events::*;
pub use observation::*;
pub use pattern::*;
pub use repository::*;
pub use threshold::*;
