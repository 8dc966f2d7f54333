//! Self-healing ports: lifecycle control, discovery, and alerting.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::CoordinationResult;
use crate::domain::models::Agent;

/// Starts and stops concrete agent processes.
#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    /// Stop the agent if it is still running. Errors are tolerated by the
    /// healing manager; a dead process cannot always be stopped cleanly.
    async fn stop(&self, agent_id: Uuid) -> CoordinationResult<()>;

    /// Start a replacement agent for the given capability, returning the new
    /// agent's id.
    async fn start(&self, capability: &str, manifest: Value) -> CoordinationResult<Uuid>;
}

/// Locates substitute agents for a capability.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Find an already-running agent that can take over the capability.
    async fn find_substitute(&self, capability: &str) -> CoordinationResult<Option<Agent>>;
}

/// Escalation sink for failures the healing manager cannot absorb.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, subject: &str, detail: &str) -> CoordinationResult<()>;
}
