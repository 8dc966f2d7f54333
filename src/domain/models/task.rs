//! Task domain model.
//!
//! Tasks are discrete units of work matched to capable agents by the manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::{CoordinationError, CoordinationResult};

/// Status of a task in the assignment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending queue.
    Pending,
    /// Matched to an agent, execution not yet started.
    Assigned,
    /// Currently being executed by an agent.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    ///
    /// `Assigned -> Pending` covers re-queueing when the assigned agent is
    /// unregistered before the work starts; `InProgress -> Pending` covers
    /// the same for work already dispatched to a now-gone agent.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Pending => vec![Self::Assigned, Self::Cancelled],
            Self::Assigned => vec![Self::InProgress, Self::Pending, Self::Cancelled],
            Self::InProgress => vec![Self::Completed, Self::Failed, Self::Pending, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Creation payload for a new task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    /// Higher values are more urgent.
    #[serde(default)]
    pub priority: i32,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A discrete unit of work owned by the agent manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Opaque task type; also the decomposer lookup key for composite tasks.
    pub task_type: String,
    /// Arbitrary input data.
    pub payload: Value,
    /// Capabilities an agent must cover to be assignable.
    pub required_capabilities: HashSet<String>,
    /// Priority; higher values are dispatched first.
    pub priority: i32,
    /// Current status.
    pub status: TaskStatus,
    /// Assigned agent, if any.
    pub assigned_agent_id: Option<Uuid>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When assigned to an agent.
    pub assigned_at: Option<DateTime<Utc>>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution result on success.
    pub result: Option<Value>,
    /// Error description on failure.
    pub error: Option<String>,
}

impl Task {
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: request.task_type,
            payload: request.payload,
            required_capabilities: request.required_capabilities,
            priority: request.priority,
            status: TaskStatus::default(),
            assigned_agent_id: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating the relevant timestamp.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> CoordinationResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(CoordinationError::InvalidTransition {
                entity: "task",
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        self.status = new_status;
        match new_status {
            TaskStatus::Assigned => self.assigned_at = Some(Utc::now()),
            TaskStatus::InProgress => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {
                // Re-queued: the previous assignment no longer applies.
                self.assigned_agent_id = None;
                self.assigned_at = None;
                self.started_at = None;
            }
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn validate(&self) -> CoordinationResult<()> {
        if self.task_type.trim().is_empty() {
            return Err(CoordinationError::ValidationFailed(
                "Task type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_from_request() {
        let task = Task::from_request(
            TaskRequest::new("index-documents")
                .with_payload(json!({"batch": 7}))
                .with_capability("indexing")
                .with_priority(5),
        );

        assert_eq!(task.task_type, "index-documents");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 5);
        assert!(task.required_capabilities.contains("indexing"));
        assert!(task.assigned_agent_id.is_none());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut task = Task::from_request(TaskRequest::new("t"));

        task.transition_to(TaskStatus::Assigned).unwrap();
        assert!(task.assigned_at.is_some());

        task.transition_to(TaskStatus::InProgress).unwrap();
        assert!(task.started_at.is_some());

        task.transition_to(TaskStatus::Completed).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = Task::from_request(TaskRequest::new("t"));
        task.transition_to(TaskStatus::Cancelled).unwrap();

        let err = task.transition_to(TaskStatus::Assigned).unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[test]
    fn test_requeue_clears_assignment() {
        let mut task = Task::from_request(TaskRequest::new("t"));
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.assigned_agent_id = Some(Uuid::new_v4());

        task.transition_to(TaskStatus::Pending).unwrap();
        assert!(task.assigned_agent_id.is_none());
        assert!(task.assigned_at.is_none());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_validation() {
        let task = Task::from_request(TaskRequest::new("  "));
        assert!(task.validate().is_err());

        let task = Task::from_request(TaskRequest::new("ok"));
        assert!(task.validate().is_ok());
    }
}
