//! Configuration model.
//!
//! One sub-struct per component, all serde-defaultable so figment can merge
//! file and environment layers over programmatic defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub aggregation: AggregationConfig,
    pub manager: ManagerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Bus client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Client name stamped into requests as `requester`.
    pub client_name: String,
    /// The single shared results topic every client reads in broadcast mode.
    pub results_topic: String,
    /// Default timeout for correlated calls, seconds.
    pub call_timeout_secs: u64,
    /// Idle poll delay for consumer-group readers, milliseconds.
    pub group_poll_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            client_name: "maestro".to_string(),
            results_topic: "results".to_string(),
            call_timeout_secs: 30,
            group_poll_interval_ms: 25,
        }
    }
}

impl BusConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn group_poll_interval(&self) -> Duration {
        Duration::from_millis(self.group_poll_interval_ms)
    }
}

/// Task scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Substituted when a subtask declares no timeout, seconds.
    pub default_subtask_timeout_secs: u64,
    /// Max fan-out of a parallel phase; larger levels are split.
    pub max_parallel: usize,
    /// Parallel phase budget = max member timeout x this factor.
    pub parallel_timeout_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_subtask_timeout_secs: 30,
            max_parallel: 4,
            parallel_timeout_factor: 1.5,
        }
    }
}

impl SchedulerConfig {
    pub fn default_subtask_timeout(&self) -> Duration {
        Duration::from_secs(self.default_subtask_timeout_secs)
    }
}

/// Result aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Results below this confidence are filtered before aggregation.
    pub min_confidence: f64,
    /// Fraction of matching action signatures required for consensus.
    pub consensus_threshold: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            consensus_threshold: 0.6,
        }
    }
}

/// Subagent manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Strategy name applied by `spawn_parallel`; parsed by the aggregator.
    pub strategy: String,
    /// Default per-check interval for background monitors, seconds.
    pub monitor_check_interval_secs: u64,
    /// Default overall timeout for background monitors, seconds.
    pub monitor_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            strategy: "best_confidence".to_string(),
            monitor_check_interval_secs: 2,
            monitor_timeout_secs: 120,
        }
    }
}

impl ManagerConfig {
    pub fn monitor_check_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_check_interval_secs)
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_secs)
    }
}

/// Automation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on checkpoint re-plans per goal.
    pub max_replans: u32,
    /// Bound on the finished-task history kept in memory.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_replans: 2,
            history_limit: 50,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
    /// When set, logs are also written to daily-rotated files here.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bus.results_topic, "results");
        assert_eq!(config.scheduler.max_parallel, 4);
        assert!((config.aggregation.min_confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.manager.strategy, "best_confidence");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_overlays_defaults() {
        let yaml = r"
scheduler:
  max_parallel: 8
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.max_parallel, 8);
        // Untouched sections keep their defaults
        assert_eq!(config.scheduler.default_subtask_timeout_secs, 30);
        assert_eq!(config.bus.call_timeout_secs, 30);
    }
}
