//! Run configuration for the evolving loop.
//!
//! This module provides the round budget, the generation concurrency limit,
//! the optional wall-clock budget and the knowledge retrieval settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::knowledge::KnowledgeConfig;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML configuration file.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for [`EvolvingLoop`](super::EvolvingLoop).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    /// Maximum number of rounds, aborted rounds included.
    pub max_rounds: usize,
    /// Maximum number of sub-tasks generated concurrently within a round.
    pub max_concurrency: usize,
    /// Wall-clock budget, checked between rounds.
    #[serde(with = "optional_secs", rename = "time_budget_secs")]
    pub time_budget: Option<Duration>,
    /// Skip merge and evaluation when every attempted sub-task failed to generate.
    pub abort_on_all_generation_failed: bool,
    /// Knowledge retrieval settings.
    pub knowledge: KnowledgeConfig,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_concurrency: 4,
            time_budget: None,
            abort_on_all_generation_failed: true,
            knowledge: KnowledgeConfig::default(),
        }
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

impl EvolveConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVOLVE_MAX_ROUNDS`: Maximum rounds (default: 10)
    /// - `EVOLVE_MAX_CONCURRENCY`: Concurrent generations per round (default: 4)
    /// - `EVOLVE_TIME_BUDGET_SECS`: Wall-clock budget in seconds (default: none)
    /// - `EVOLVE_ABORT_ON_ALL_FAILED`: Abort rounds where nothing generated (default: true)
    /// - `EVOLVE_SIMILAR_SUCCESS_LIMIT`: Similar precedents per task (default: 5)
    /// - `EVOLVE_FORMER_FAILURE_LIMIT`: Failure traces per task (default: 5)
    /// - `EVOLVE_SIMILARITY_THRESHOLD`: Minimum precedent similarity (default: 0.0)
    /// - `EVOLVE_MAX_FAILURES`: Give up on a task after this many failures (default: never)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("EVOLVE_MAX_ROUNDS") {
            config.max_rounds = parse_env_value(&val, "EVOLVE_MAX_ROUNDS")?;
        }

        if let Ok(val) = std::env::var("EVOLVE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_env_value(&val, "EVOLVE_MAX_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("EVOLVE_TIME_BUDGET_SECS") {
            let secs: u64 = parse_env_value(&val, "EVOLVE_TIME_BUDGET_SECS")?;
            config.time_budget = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("EVOLVE_ABORT_ON_ALL_FAILED") {
            config.abort_on_all_generation_failed =
                parse_env_bool(&val, "EVOLVE_ABORT_ON_ALL_FAILED")?;
        }

        // Knowledge settings
        if let Ok(val) = std::env::var("EVOLVE_SIMILAR_SUCCESS_LIMIT") {
            config.knowledge.similar_success_limit =
                parse_env_value(&val, "EVOLVE_SIMILAR_SUCCESS_LIMIT")?;
        }

        if let Ok(val) = std::env::var("EVOLVE_FORMER_FAILURE_LIMIT") {
            config.knowledge.former_failure_limit =
                parse_env_value(&val, "EVOLVE_FORMER_FAILURE_LIMIT")?;
        }

        if let Ok(val) = std::env::var("EVOLVE_SIMILARITY_THRESHOLD") {
            config.knowledge.similarity_threshold =
                parse_env_value(&val, "EVOLVE_SIMILARITY_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("EVOLVE_MAX_FAILURES") {
            config.knowledge.max_failures_before_giving_up =
                Some(parse_env_value(&val, "EVOLVE_MAX_FAILURES")?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a YAML configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.time_budget.is_some_and(|b| b.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "time_budget must be greater than 0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.knowledge.similarity_threshold) {
            return Err(ConfigError::ValidationFailed(
                "similarity_threshold must be between -1.0 and 1.0".to_string(),
            ));
        }

        if self.knowledge.embedding_dimension == 0 {
            return Err(ConfigError::ValidationFailed(
                "embedding_dimension must be greater than 0".to_string(),
            ));
        }

        if self.knowledge.max_failures_before_giving_up == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_failures_before_giving_up must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the round budget.
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Builder method to set the generation concurrency limit.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Builder method to set the wall-clock budget.
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Builder method to enable or disable aborting rounds where nothing generated.
    pub fn with_abort_on_all_generation_failed(mut self, enabled: bool) -> Self {
        self.abort_on_all_generation_failed = enabled;
        self
    }

    /// Builder method to set the knowledge retrieval settings.
    pub fn with_knowledge(mut self, knowledge: KnowledgeConfig) -> Self {
        self.knowledge = knowledge;
        self
    }

    /// Builder method to set the give-up threshold.
    pub fn with_max_failures_before_giving_up(mut self, limit: usize) -> Self {
        self.knowledge.max_failures_before_giving_up = Some(limit);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
