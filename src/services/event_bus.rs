//! EventBus service for unified event streaming and distribution.
//!
//! Broadcast-based event system with sequence numbering. Lifecycle events
//! from the registry, manager, coordinator, and healing manager all flow
//! through a single bus so observers get one ordered stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Registry,
    Task,
    Workflow,
    Healing,
}

/// Event envelope containing metadata plus the domain payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub payload: EventPayload,
}

/// Domain event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Registry events
    AgentRegistered {
        agent_id: Uuid,
        name: String,
    },
    AgentUnregistered {
        agent_id: Uuid,
    },
    AgentStatusChanged {
        agent_id: Uuid,
        from: String,
        to: String,
    },
    AgentWentOffline {
        agent_id: Uuid,
        last_heartbeat: DateTime<Utc>,
    },
    AgentEvicted {
        agent_id: Uuid,
    },

    // Task lifecycle events
    TaskSubmitted {
        task_id: Uuid,
        task_type: String,
        priority: i32,
    },
    TaskAssigned {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskStarted {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskFailed {
        task_id: Uuid,
        agent_id: Option<Uuid>,
        error: String,
    },
    TaskCancelled {
        task_id: Uuid,
    },
    TaskRequeued {
        task_id: Uuid,
        reason: String,
    },

    // Workflow events
    WorkflowStarted {
        task_id: Uuid,
        subtask_count: usize,
        level_count: usize,
    },
    LevelStarted {
        task_id: Uuid,
        level: usize,
        subtask_count: usize,
    },
    LevelCompleted {
        task_id: Uuid,
        level: usize,
        succeeded: usize,
        failed: usize,
    },
    SubtaskCompleted {
        task_id: Uuid,
        subtask_id: String,
    },
    SubtaskFailed {
        task_id: Uuid,
        subtask_id: String,
        error: String,
    },
    RollbackStarted {
        task_id: Uuid,
        compensations: usize,
    },
    CompensationFailed {
        task_id: Uuid,
        subtask_id: String,
        error: String,
    },
    WorkflowFinished {
        task_id: Uuid,
        status: String,
    },

    // Healing events
    RestartScheduled {
        agent_id: Uuid,
        attempt: u32,
        delay_ms: u64,
    },
    RestartSucceeded {
        agent_id: Uuid,
        replacement_id: Uuid,
    },
    RestartFailed {
        agent_id: Uuid,
        attempt: u32,
        error: String,
    },
    SubstituteFound {
        agent_id: Uuid,
        substitute_id: Uuid,
        capability: String,
    },
    FeatureDegraded {
        capability: String,
    },
    EscalationRaised {
        agent_id: Uuid,
        reason: String,
    },
}

impl EventPayload {
    /// Default severity and category for this payload.
    pub fn classify(&self) -> (EventSeverity, EventCategory) {
        match self {
            Self::AgentRegistered { .. } | Self::AgentUnregistered { .. } => {
                (EventSeverity::Info, EventCategory::Registry)
            }
            Self::AgentStatusChanged { .. } => (EventSeverity::Debug, EventCategory::Registry),
            Self::AgentWentOffline { .. } | Self::AgentEvicted { .. } => {
                (EventSeverity::Warning, EventCategory::Registry)
            }

            Self::TaskSubmitted { .. }
            | Self::TaskAssigned { .. }
            | Self::TaskStarted { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskCancelled { .. } => (EventSeverity::Info, EventCategory::Task),
            Self::TaskFailed { .. } => (EventSeverity::Error, EventCategory::Task),
            Self::TaskRequeued { .. } => (EventSeverity::Warning, EventCategory::Task),

            Self::WorkflowStarted { .. }
            | Self::LevelStarted { .. }
            | Self::LevelCompleted { .. }
            | Self::SubtaskCompleted { .. }
            | Self::WorkflowFinished { .. } => (EventSeverity::Info, EventCategory::Workflow),
            Self::SubtaskFailed { .. } | Self::RollbackStarted { .. } => {
                (EventSeverity::Warning, EventCategory::Workflow)
            }
            Self::CompensationFailed { .. } => (EventSeverity::Error, EventCategory::Workflow),

            Self::RestartScheduled { .. } | Self::SubstituteFound { .. } => {
                (EventSeverity::Info, EventCategory::Healing)
            }
            Self::RestartSucceeded { .. } => (EventSeverity::Info, EventCategory::Healing),
            Self::RestartFailed { .. } | Self::FeatureDegraded { .. } => {
                (EventSeverity::Warning, EventCategory::Healing)
            }
            Self::EscalationRaised { .. } => (EventSeverity::Critical, EventCategory::Healing),
        }
    }
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a domain event, classifying severity and category from the
    /// payload and assigning the next sequence number.
    pub fn publish(&self, payload: EventPayload) {
        let (severity, category) = payload.classify();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = CoordinationEvent {
            id: EventId::new(),
            sequence: SequenceNumber(seq),
            timestamp: Utc::now(),
            severity,
            category,
            payload,
        };

        // Send errors mean no subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Current sequence number (events published so far).
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_assignment() {
        let bus = EventBus::default();
        assert_eq!(bus.current_sequence(), 0);

        let mut rx = bus.subscribe();

        bus.publish(EventPayload::AgentRegistered {
            agent_id: Uuid::new_v4(),
            name: "w1".to_string(),
        });
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);

        bus.publish(EventPayload::AgentUnregistered {
            agent_id: Uuid::new_v4(),
        });
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);

        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_classification() {
        let (severity, category) = EventPayload::TaskFailed {
            task_id: Uuid::new_v4(),
            agent_id: None,
            error: "boom".to_string(),
        }
        .classify();
        assert_eq!(severity, EventSeverity::Error);
        assert_eq!(category, EventCategory::Task);

        let (severity, category) = EventPayload::EscalationRaised {
            agent_id: Uuid::new_v4(),
            reason: "unrecoverable".to_string(),
        }
        .classify();
        assert_eq!(severity, EventSeverity::Critical);
        assert_eq!(category, EventCategory::Healing);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(EventPayload::FeatureDegraded {
            capability: "ocr".to_string(),
        });
        assert_eq!(bus.current_sequence(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
