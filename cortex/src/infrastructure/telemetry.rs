// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tracing subscriber setup for processes embedding the engine.

use anyhow::{Context, Result};

use crate::domain::config::LoggingConfig;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `level`. `format` is `"json"` or `"compact"`.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(level: &str, format: &str) -> Result<bool> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let installed = match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .is_ok(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .try_init()
            .is_ok(),
    };

    Ok(installed)
}

pub fn init_from_config(config: &LoggingConfig) -> Result<bool> {
    init_tracing(&config.level, &config.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_reported() {
        init_tracing("debug", "compact").unwrap();
        let second = init_from_config(&LoggingConfig::default()).unwrap();
        assert!(!second);
    }
}
