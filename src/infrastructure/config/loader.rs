use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents: {0}. Must be at least 1")]
    InvalidMaxAgents(usize),

    #[error("Invalid max_tasks: {0}. Must be at least 1")]
    InvalidMaxTasks(usize),

    #[error("Invalid max_tasks_per_agent: {0}. Must be at least 1")]
    InvalidMaxTasksPerAgent(usize),

    #[error("Invalid heartbeat_timeout_secs: {0}. Must be positive")]
    InvalidHeartbeatTimeout(u64),

    #[error(
        "Invalid selection_strategy: {0}. Must be one of: round_robin, least_loaded, random, priority_aware"
    )]
    InvalidSelectionStrategy(String),

    #[error("Invalid subtask_timeout_secs: {0}. Must be positive")]
    InvalidSubtaskTimeout(u64),

    #[error("Invalid max_concurrent_subtasks: {0}. Must be at least 1")]
    InvalidMaxConcurrentSubtasks(usize),

    #[error("Invalid base_backoff_ms: {0}. Must be positive")]
    InvalidBaseBackoff(u64),

    #[error("Invalid max_restart_attempts: {0}. Cannot be 0")]
    InvalidMaxRestartAttempts(u32),

    #[error("Invalid attempt_window_secs: {0}. Must be positive")]
    InvalidAttemptWindow(u64),

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
    /// 2. .drover/config.yaml (project config)
    /// 3. .drover/local.yaml (project local overrides, optional)
    /// 4. Environment variables (DROVER_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".drover/config.yaml"))
            .merge(Yaml::file(".drover/local.yaml"))
            .merge(Env::prefixed("DROVER_").split("__"))
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
        if config.registry.max_agents == 0 {
            return Err(ConfigError::InvalidMaxAgents(config.registry.max_agents));
        }

        if config.registry.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::InvalidHeartbeatTimeout(
                config.registry.heartbeat_timeout_secs,
            ));
        }

        if config.manager.max_tasks == 0 {
            return Err(ConfigError::InvalidMaxTasks(config.manager.max_tasks));
        }

        if config.manager.max_tasks_per_agent == 0 {
            return Err(ConfigError::InvalidMaxTasksPerAgent(
                config.manager.max_tasks_per_agent,
            ));
        }

        let valid_strategies = ["round_robin", "least_loaded", "random", "priority_aware"];
        if !valid_strategies.contains(&config.manager.selection_strategy.as_str()) {
            return Err(ConfigError::InvalidSelectionStrategy(
                config.manager.selection_strategy.clone(),
            ));
        }

        if config.coordinator.subtask_timeout_secs == 0 {
            return Err(ConfigError::InvalidSubtaskTimeout(
                config.coordinator.subtask_timeout_secs,
            ));
        }

        if config.coordinator.max_concurrent_subtasks == 0 {
            return Err(ConfigError::InvalidMaxConcurrentSubtasks(
                config.coordinator.max_concurrent_subtasks,
            ));
        }

        if config.healing.base_backoff_ms == 0 {
            return Err(ConfigError::InvalidBaseBackoff(
                config.healing.base_backoff_ms,
            ));
        }

        if config.healing.max_restart_attempts == 0 {
            return Err(ConfigError::InvalidMaxRestartAttempts(
                config.healing.max_restart_attempts,
            ));
        }

        if config.healing.attempt_window_secs == 0 {
            return Err(ConfigError::InvalidAttemptWindow(
                config.healing.attempt_window_secs,
            ));
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
