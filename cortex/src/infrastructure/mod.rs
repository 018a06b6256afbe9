// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for the learning engine

pub mod memory_repository;
pub mod sqlite_repository;
pub mod embedding_client;
pub mod event_bus;
pub mod telemetry;

pub use memory_repository::{
    in_memory_repositories, InMemoryEmbeddingRepository, InMemoryPatternRepository, InMemoryThresholdRepository,
};
pub use sqlite_repository::SqliteCortexStore;
pub use embedding_client::HashingEmbeddingClient;
pub use event_bus::{ChannelObserver, EventBusError, EventReceiver, ObserverRegistry};
pub use telemetry::{init_from_config, init_tracing};
