use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid min_confidence: {0}. Must be within [0, 1]")]
    InvalidMinConfidence(f64),

    #[error("Invalid consensus_threshold: {0}. Must be within (0, 1]")]
    InvalidConsensusThreshold(f64),

    #[error("Invalid max_parallel: {0}. Must be at least 1")]
    InvalidMaxParallel(usize),

    #[error("Invalid parallel_timeout_factor: {0}. Must be at least 1.0")]
    InvalidTimeoutFactor(f64),

    #[error("Invalid default_subtask_timeout_secs: must be positive")]
    InvalidSubtaskTimeout,

    #[error("Invalid aggregation strategy: {0}")]
    InvalidStrategy(String),

    #[error("Results topic cannot be empty")]
    EmptyResultsTopic,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .maestro/config.yaml (project config)
    /// 3. .maestro/local.yaml (local overrides, optional)
    /// 4. Environment variables (`MAESTRO_`* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".maestro/config.yaml"))
            .merge(Yaml::file(".maestro/local.yaml"))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&config.aggregation.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(
                config.aggregation.min_confidence,
            ));
        }

        if config.aggregation.consensus_threshold <= 0.0
            || config.aggregation.consensus_threshold > 1.0
        {
            return Err(ConfigError::InvalidConsensusThreshold(
                config.aggregation.consensus_threshold,
            ));
        }

        if config.scheduler.max_parallel == 0 {
            return Err(ConfigError::InvalidMaxParallel(config.scheduler.max_parallel));
        }

        if config.scheduler.parallel_timeout_factor < 1.0 {
            return Err(ConfigError::InvalidTimeoutFactor(
                config.scheduler.parallel_timeout_factor,
            ));
        }

        if config.scheduler.default_subtask_timeout_secs == 0 {
            return Err(ConfigError::InvalidSubtaskTimeout);
        }

        if crate::services::AggregationStrategy::from_str(&config.manager.strategy).is_none() {
            return Err(ConfigError::InvalidStrategy(config.manager.strategy.clone()));
        }

        if config.bus.results_topic.is_empty() {
            return Err(ConfigError::EmptyResultsTopic);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigLoader::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "scheduler:\n  max_parallel: 2\nmanager:\n  strategy: consensus\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.scheduler.max_parallel, 2);
        assert_eq!(config.manager.strategy, "consensus");
        // Defaults fill everything else
        assert_eq!(config.bus.results_topic, "results");
    }

    #[test]
    fn test_rejects_bad_confidence() {
        let mut config = Config::default();
        config.aggregation.min_confidence = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMinConfidence(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let mut config = Config::default();
        config.manager.strategy = "coin_flip".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn test_rejects_zero_fanout() {
        let mut config = Config::default();
        config.scheduler.max_parallel = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxParallel(0))
        ));
    }
}
