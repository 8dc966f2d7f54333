use serde::{Deserialize, Serialize};

/// Main configuration structure for Drover
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Agent registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Agent manager configuration
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Coordination engine configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Self-healing configuration
    #[serde(default)]
    pub healing: HealingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Maximum number of agents the registry will hold
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Seconds without a heartbeat before an agent is marked offline
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Interval of the retention sweep that drops long-offline agents
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,

    /// Seconds an offline agent is retained before the sweep removes it
    #[serde(default = "default_offline_retention_secs")]
    pub offline_retention_secs: u64,
}

const fn default_max_agents() -> usize {
    1000
}

const fn default_heartbeat_timeout_secs() -> u64 {
    30
}

const fn default_retention_sweep_secs() -> u64 {
    60
}

const fn default_offline_retention_secs() -> u64 {
    3600
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            retention_sweep_secs: default_retention_sweep_secs(),
            offline_retention_secs: default_offline_retention_secs(),
        }
    }
}

/// Agent manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Maximum number of tasks held in the store
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    /// Concurrency ceiling per agent
    #[serde(default = "default_max_tasks_per_agent")]
    pub max_tasks_per_agent: usize,

    /// Dispatch tick interval in milliseconds
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Agent selection strategy: round_robin, least_loaded, random, priority_aware
    #[serde(default = "default_selection_strategy")]
    pub selection_strategy: String,
}

const fn default_max_tasks() -> usize {
    10000
}

const fn default_max_tasks_per_agent() -> usize {
    3
}

const fn default_dispatch_interval_ms() -> u64 {
    500
}

fn default_selection_strategy() -> String {
    "least_loaded".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_tasks: default_max_tasks(),
            max_tasks_per_agent: default_max_tasks_per_agent(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            selection_strategy: default_selection_strategy(),
        }
    }
}

/// Coordination engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Per-subtask execution timeout in seconds
    #[serde(default = "default_subtask_timeout_secs")]
    pub subtask_timeout_secs: u64,

    /// Maximum subtasks dispatched concurrently within a level
    #[serde(default = "default_max_concurrent_subtasks")]
    pub max_concurrent_subtasks: usize,

    /// Seconds to wait for in-flight work during shutdown
    #[serde(default = "default_shutdown_wait_secs")]
    pub shutdown_wait_secs: u64,
}

const fn default_subtask_timeout_secs() -> u64 {
    300
}

const fn default_max_concurrent_subtasks() -> usize {
    10
}

const fn default_shutdown_wait_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            subtask_timeout_secs: default_subtask_timeout_secs(),
            max_concurrent_subtasks: default_max_concurrent_subtasks(),
            shutdown_wait_secs: default_shutdown_wait_secs(),
        }
    }
}

/// Self-healing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealingConfig {
    /// Base restart backoff in milliseconds; doubles per consecutive attempt
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Maximum restart attempts within the rolling window
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Rolling window in seconds over which restart attempts are counted
    #[serde(default = "default_attempt_window_secs")]
    pub attempt_window_secs: u64,
}

const fn default_base_backoff_ms() -> u64 {
    1000
}

const fn default_max_restart_attempts() -> u32 {
    5
}

const fn default_attempt_window_secs() -> u64 {
    300
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            attempt_window_secs: default_attempt_window_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry.max_agents, 1000);
        assert_eq!(config.registry.heartbeat_timeout_secs, 30);
        assert_eq!(config.manager.max_tasks_per_agent, 3);
        assert_eq!(config.coordinator.subtask_timeout_secs, 300);
        assert_eq!(config.healing.max_restart_attempts, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r"
manager:
  max_tasks_per_agent: 8
healing:
  base_backoff_ms: 250
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.manager.max_tasks_per_agent, 8);
        assert_eq!(config.manager.max_tasks, 10000);
        assert_eq!(config.healing.base_backoff_ms, 250);
        assert_eq!(config.healing.attempt_window_secs, 300);
    }
}
