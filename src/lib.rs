//! Drover - In-Memory Multi-Agent Coordination Substrate
//!
//! Drover coordinates a fleet of worker agents: it tracks their identity,
//! capabilities, and heartbeat liveness; assigns tasks by capability and
//! load; decomposes composite tasks into leveled dependency graphs executed
//! with Saga-style compensation; and restarts failed agents with exponential
//! backoff and escalation.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors, and the port traits that
//!   decouple the services from their environment
//! - **Service Layer** (`services`): registry, manager, coordination engine,
//!   self-healing, and the shared primitives (priority queue, event bus)
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and
//!   logging setup
//!
//! # Example
//!
//! ```ignore
//! use drover::{AgentRegistry, EventBus};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = drover::ConfigLoader::load()?;
//!     let events = Arc::new(EventBus::default());
//!     let registry = AgentRegistry::new(config.registry, events);
//!     Ok(())
//! }
//! ```

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{CoordinationError, CoordinationResult};
pub use domain::models::{
    Agent, AgentRegistration, AgentStatus, CompensationAction, Config, CoordinatedStatus,
    CoordinatedTask, CoordinatorConfig, DependencyGraph, ExecutionPlan, HealingConfig,
    LoggingConfig, ManagerConfig, RegistryConfig, Subtask, Task, TaskRequest, TaskStatus,
};
pub use domain::ports::{
    AgentLifecycle, AgentRunner, AlertSink, Discovery, MessageChannel, TaskDecomposer, TaskRouter,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::logging::init_logging;
pub use services::{
    AgentManager, AgentManifest, AgentRegistry, CoordinationEngine, Criticality, EventBus,
    EventBusConfig, EventPayload, PriorityQueue, SelectionStrategy, SelfHealingManager,
};
