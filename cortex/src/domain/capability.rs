// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capability matching between callers and patterns.
//!
//! A pattern requires the union of the capabilities implied by its action
//! steps and any explicit `requires` condition. A caller that declares a
//! capability set may only be served patterns whose requirements it covers;
//! a caller without a declared set is unrestricted.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::pattern::Pattern;

pub const REQUIRES_CONDITION: &str = "requires";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Write,
    Search,
    Execute,
    Test,
    Network,
    Coordinate,
    Custom(String),
}

impl Capability {
    /// Capability implied by an action name, if the name is recognised.
    pub fn for_action(action: &str) -> Option<Capability> {
        let action = action.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| action.contains(n));

        if has(&["test", "assert", "verify"]) {
            Some(Capability::Test)
        } else if has(&["grep", "glob", "search", "find"]) {
            Some(Capability::Search)
        } else if has(&["write", "edit", "patch", "create", "delete"]) {
            Some(Capability::Write)
        } else if has(&["read", "cat", "open", "view"]) {
            Some(Capability::Read)
        } else if has(&["bash", "exec", "run", "shell", "build"]) {
            Some(Capability::Execute)
        } else if has(&["fetch", "http", "download", "web"]) {
            Some(Capability::Network)
        } else if has(&["spawn", "delegate", "task", "agent"]) {
            Some(Capability::Coordinate)
        } else {
            None
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Read => f.write_str("read"),
            Capability::Write => f.write_str("write"),
            Capability::Search => f.write_str("search"),
            Capability::Execute => f.write_str("execute"),
            Capability::Test => f.write_str("test"),
            Capability::Network => f.write_str("network"),
            Capability::Coordinate => f.write_str("coordinate"),
            Capability::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for Capability {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "read" => Capability::Read,
            "write" => Capability::Write,
            "search" => Capability::Search,
            "execute" => Capability::Execute,
            "test" => Capability::Test,
            "network" => Capability::Network,
            "coordinate" => Capability::Coordinate,
            _ => Capability::Custom(normalized),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_superset(&self, other: &CapabilitySet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// What a pattern needs in order to be applied.
    pub fn required_by(pattern: &Pattern) -> Self {
        let mut required: BTreeSet<Capability> =
            pattern.steps.iter().filter_map(|s| Capability::for_action(s)).collect();

        if let Some(explicit) = pattern.conditions.get(REQUIRES_CONDITION) {
            required.extend(
                explicit
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| s.parse::<Capability>().ok()),
            );
        }

        Self(required)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
