// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Working Memory
//!
//! Short-lived record of which patterns were applied to which task.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Lets `observe` tag observations with the patterns active for
//!   their task and lets outcome tracking resolve a pattern from a task id
//!
//! Shared with a [`LearningPipeline`](crate::application::pipeline::LearningPipeline)
//! through `Arc`, either created by it or injected with
//! `with_working_memory`, and cleared when the pipeline shuts down.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::pattern::PatternId;

#[derive(Debug, Clone)]
struct Applied {
    pattern_ids: Vec<PatternId>,
    touched_at: Instant,
}

#[derive(Debug)]
pub struct WorkingMemory {
    ttl: Duration,
    tasks: Mutex<HashMap<String, Applied>>,
}

impl WorkingMemory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Remember that `pattern_id` was applied to `task_id`.
    pub fn remember(&self, task_id: &str, pattern_id: PatternId) {
        let mut tasks = self.tasks.lock();
        let now = Instant::now();
        tasks.retain(|_, applied| now.duration_since(applied.touched_at) < self.ttl);

        let entry = tasks.entry(task_id.to_string()).or_insert_with(|| Applied {
            pattern_ids: Vec::new(),
            touched_at: now,
        });
        entry.touched_at = now;
        entry.pattern_ids.retain(|p| *p != pattern_id);
        entry.pattern_ids.push(pattern_id);
    }

    /// Patterns applied to `task_id`, least recently applied first. Empty once expired.
    pub fn active_patterns(&self, task_id: &str) -> Vec<PatternId> {
        let tasks = self.tasks.lock();
        match tasks.get(task_id) {
            Some(applied) if applied.touched_at.elapsed() < self.ttl => applied.pattern_ids.clone(),
            _ => Vec::new(),
        }
    }

    /// The pattern most recently applied to `task_id`.
    pub fn latest_pattern(&self, task_id: &str) -> Option<PatternId> {
        self.active_patterns(task_id).last().copied()
    }

    pub fn forget(&self, task_id: &str) {
        self.tasks.lock().remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn clear(&self) {
        self.tasks.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_and_resolve() {
        let memory = WorkingMemory::new(Duration::from_secs(60));
        let first = PatternId::new();
        let second = PatternId::new();

        memory.remember("task-1", first);
        memory.remember("task-1", second);
        memory.remember("task-1", first);

        assert_eq!(memory.active_patterns("task-1"), vec![second, first]);
        assert_eq!(memory.latest_pattern("task-1"), Some(first));
        assert!(memory.active_patterns("task-2").is_empty());

        memory.forget("task-1");
        assert!(memory.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let memory = WorkingMemory::new(Duration::from_millis(0));
        memory.remember("task-1", PatternId::new());
        assert!(memory.latest_pattern("task-1").is_none());
    }

    #[test]
    fn test_clear() {
        let memory = WorkingMemory::new(Duration::from_secs(60));
        memory.remember("a", PatternId::new());
        memory.remember("b", PatternId::new());
        assert_eq!(memory.len(), 2);
        memory.clear();
        assert!(memory.is_empty());
    }
}
