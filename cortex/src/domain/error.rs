// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Engine Error Taxonomy
//!
//! | Variant | Raised when | Caller sees |
//! |---------|-------------|-------------|
//! | `Validation` | malformed pattern / observation / config value | immediately, nothing persisted |
//! | `NotFound` | an explicitly requested pattern or embedding is missing | only on explicit requests |
//! | `Storage` | the backing repository fails | propagated from the triggering operation |
//! | `Extraction` | a single observation inside a batch is malformed | logged and skipped, never aborts a batch |
//! | `Embedding` | the injected generator fails or returns a bad vector | propagated |
//! | `Cancelled` | a consolidation/extraction pass was interrupted | reported, store left consistent |

use thiserror::Error;

use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CortexError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CortexError::Validation(msg.into())
    }

    /// Whether the failure came from the backing store and may succeed if retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CortexError::Storage(_))
    }
}

pub type CortexResult<T> = Result<T, CortexError>;
