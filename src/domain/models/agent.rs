//! Agent domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Capability tag assigned to agents registered without any.
pub const DEFAULT_CAPABILITY: &str = "general";

/// Agent status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
    Error,
}

impl AgentStatus {
    /// Whether an agent in this status can be offered work.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            _ => Err(anyhow::anyhow!("Invalid agent status: {s}")),
        }
    }
}

/// Registration payload for a new agent.
///
/// Fields left empty are defaulted by the registry: a fresh id, and the
/// [`DEFAULT_CAPABILITY`] tag when no capabilities are declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
}

impl AgentRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            capabilities: HashSet::new(),
        }
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Use an explicit id instead of a generated one.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// A worker entity tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier.
    pub id: Uuid,

    /// Human-readable name.
    pub name: String,

    /// Opaque capability tags describing what work this agent can perform.
    pub capabilities: HashSet<String>,

    /// Current status.
    pub status: AgentStatus,

    /// Last heartbeat timestamp.
    pub last_heartbeat: DateTime<Utc>,

    /// ID of the currently executing task (if any).
    pub current_task_id: Option<Uuid>,

    /// Number of tasks completed successfully.
    pub tasks_completed: u64,

    /// Number of tasks that failed.
    pub tasks_failed: u64,

    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent from a registration, applying defaults.
    pub fn from_registration(registration: AgentRegistration) -> Self {
        let now = Utc::now();
        let mut capabilities = registration.capabilities;
        if capabilities.is_empty() {
            capabilities.insert(DEFAULT_CAPABILITY.to_string());
        }
        Self {
            id: registration.id.unwrap_or_else(Uuid::new_v4),
            name: registration.name,
            capabilities,
            status: AgentStatus::Idle,
            last_heartbeat: now,
            current_task_id: None,
            tasks_completed: 0,
            tasks_failed: 0,
            registered_at: now,
        }
    }

    /// Check if the agent missed its heartbeat for longer than `threshold`.
    pub fn is_stale(&self, threshold: chrono::Duration) -> bool {
        Utc::now() - self.last_heartbeat > threshold
    }

    /// Update the heartbeat to the current time.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    /// Check if this agent's capability set covers every required tag.
    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Capabilities missing from this agent for the given requirement set.
    pub fn missing_capabilities(&self, required: &HashSet<String>) -> Vec<String> {
        let mut missing: Vec<String> = required.difference(&self.capabilities).cloned().collect();
        missing.sort();
        missing
    }
}
