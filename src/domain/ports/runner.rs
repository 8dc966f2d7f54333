//! Task execution port.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::CoordinationResult;
use crate::domain::models::Task;

/// Executes an assigned task on behalf of an agent.
///
/// The manager spawns one execution per assignment and records the outcome;
/// implementations carry the actual transport (in-process closure, RPC, a
/// subprocess) behind this seam.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the task to completion, returning its result payload.
    async fn run(&self, task: &Task) -> CoordinationResult<Value>;
}
