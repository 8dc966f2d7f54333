//! Domain errors for the coordination substrate.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `a -> b -> c -> a`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors produced by the coordination components.
///
/// Variants fall into three families with different handling contracts:
/// not-found errors are always surfaced to the caller and never retried,
/// policy violations (capability, capacity, state-machine) are surfaced and
/// never retried, and execution failures trigger component-specific recovery
/// (rollback in the coordination engine, backoff in the self-healing manager).
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Coordinated task not found: {0}")]
    CoordinatedTaskNotFound(Uuid),

    #[error("No active coordinated task owns subtask: {0}")]
    SubtaskNotFound(String),

    #[error("No decomposer registered for task type: {0}")]
    NoDecomposer(String),

    #[error("Subtask {subtask} depends on unknown subtask {dependency}")]
    UnknownDependency { subtask: String, dependency: String },

    #[error("Duplicate subtask id: {0}")]
    DuplicateSubtask(String),

    #[error("Subtask dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    #[error("Agent {agent} is missing required capabilities: {missing:?}")]
    CapabilityMismatch { agent: Uuid, missing: Vec<String> },

    #[error("Agent {agent} is at its concurrency ceiling of {limit}")]
    CapacityExceeded { agent: Uuid, limit: usize },

    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    #[error("Message channel error: {0}")]
    ChannelError(String),

    #[error("Key not found in priority queue: {0}")]
    QueueKeyNotFound(String),

    #[error("Task store is full and no entry can be evicted")]
    StoreFull,

    #[error("Component is shutting down")]
    ShuttingDown,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl CoordinationError {
    /// Whether this is a lookup failure for an unknown id.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AgentNotFound(_)
                | Self::TaskNotFound(_)
                | Self::CoordinatedTaskNotFound(_)
                | Self::SubtaskNotFound(_)
                | Self::QueueKeyNotFound(_)
        )
    }

    /// Whether this is a policy violation (never retried).
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::CapabilityMismatch { .. }
                | Self::CapacityExceeded { .. }
                | Self::InvalidTransition { .. }
                | Self::DependencyCycle(_)
                | Self::UnknownDependency { .. }
                | Self::DuplicateSubtask(_)
                | Self::ValidationFailed(_)
                | Self::StoreFull
        )
    }

    /// Whether this is a runtime execution failure (recoverable by the owner).
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFailed(_) | Self::Timeout { .. } | Self::ChannelError(_)
        )
    }
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::ValidationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_families() {
        assert!(CoordinationError::AgentNotFound(Uuid::new_v4()).is_not_found());
        assert!(CoordinationError::CapacityExceeded {
            agent: Uuid::new_v4(),
            limit: 3,
        }
        .is_policy_violation());
        assert!(CoordinationError::Timeout {
            what: "subtask fetch".to_string(),
            secs: 30,
        }
        .is_execution_failure());

        let err = CoordinationError::ExecutionFailed("boom".to_string());
        assert!(!err.is_not_found());
        assert!(!err.is_policy_violation());
    }

    #[test]
    fn test_cycle_path_formatting() {
        let err = CoordinationError::DependencyCycle(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Subtask dependency cycle detected: a -> b -> a"
        );
    }
}
