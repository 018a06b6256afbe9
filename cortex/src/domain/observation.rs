// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Observation value objects.
//!
//! An [`Observation`] is one recorded tool/action execution. It is created by
//! the pipeline on every `observe` call, is immutable, and lives only in the
//! extraction buffer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::pattern::PatternId;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationId(pub Uuid);

impl ObservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Where an action ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub task_id: String,
    pub agent_id: String,
    pub working_directory: String,
    #[serde(default)]
    pub active_pattern_ids: Vec<PatternId>,
    #[serde(default)]
    pub step_count: u32,
}

impl ExecutionContext {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        working_directory: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            working_directory: working_directory.into(),
            active_pattern_ids: Vec::new(),
            step_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ObservationOutcome {
    pub fn succeeded() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub parameters: BTreeMap<String, Value>,
    pub outcome: ObservationOutcome,
    pub duration_ms: f64,
    pub context: ExecutionContext,
}

impl Observation {
    /// Build an observation; parameters are redacted on the way in.
    pub fn new(
        action: impl Into<String>,
        parameters: BTreeMap<String, Value>,
        outcome: ObservationOutcome,
        duration_ms: f64,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id: ObservationId::new(),
            timestamp: Utc::now(),
            action: action.into(),
            parameters: redact_parameters(parameters),
            outcome,
            duration_ms,
            context,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.success
    }

    /// Reason this observation cannot take part in extraction, if any.
    pub fn defect(&self) -> Option<String> {
        if self.action.trim().is_empty() {
            return Some(format!("observation {} has an empty action name", self.id.0));
        }
        if self.context.task_id.trim().is_empty() {
            return Some(format!("observation {} has no task id", self.id.0));
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Some(format!(
                "observation {} has invalid duration {}",
                self.id.0, self.duration_ms
            ));
        }
        None
    }
}

/// Replace values of credential-like keys, recursing into nested objects.
pub fn redact_parameters(parameters: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    parameters
        .into_iter()
        .map(|(key, value)| {
            if is_sensitive_key(&key) {
                (key, Value::String(REDACTED.to_string()))
            } else {
                (key, redact_value(value))
            }
        })
        .collect()
}

fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_value(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| lowered.contains(needle))
}
