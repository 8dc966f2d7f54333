//! Decomposition and routing ports.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::CoordinationResult;
use crate::domain::models::{Agent, Subtask, Task};

/// Splits a composite task into subtasks with dependencies.
///
/// Registered per task type with the coordination engine; the returned
/// subtask ids must be unique within the task and the dependency relation
/// acyclic, both of which the engine verifies before planning.
#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    async fn decompose(&self, task: &Task) -> CoordinationResult<Vec<Subtask>>;
}

/// Optional external ranking hook for agent selection.
///
/// When installed on the manager it is consulted before the configured
/// selection strategy; a failure here is logged and selection falls back to
/// the strategy, never to the caller.
#[async_trait]
pub trait TaskRouter: Send + Sync {
    /// Pick the best agent for the task from the capable candidates.
    async fn rank(&self, task: &Task, candidates: &[Agent]) -> CoordinationResult<Uuid>;
}
