//! Domain models for the coordination substrate.

pub mod agent;
pub mod config;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentRegistration, AgentStatus, DEFAULT_CAPABILITY};
pub use config::{
    Config, CoordinatorConfig, HealingConfig, LoggingConfig, ManagerConfig, RegistryConfig,
};
pub use task::{Task, TaskRequest, TaskStatus};
pub use workflow::{
    CompensationAction, CoordinatedStatus, CoordinatedTask, DependencyGraph, ExecutionPlan,
    Subtask,
};
