//! Agent registry: identity, capability lookup, and heartbeat liveness.
//!
//! Each registered agent gets its own liveness timer that marks it Offline
//! when heartbeats stop; a single long-period sweep permanently drops agents
//! that stay Offline past the retention window.

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::models::config::RegistryConfig;
use crate::domain::models::{Agent, AgentRegistration, AgentStatus};
use crate::services::bounded_map::BoundedMap;
use crate::services::event_bus::{EventBus, EventPayload};

/// Registry statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub offline: usize,
    pub error: usize,
    /// Agents currently not Offline.
    pub active: usize,
    /// Capability tag histogram.
    pub capabilities: HashMap<String, usize>,
}

struct RegistryInner {
    agents: RwLock<BoundedMap<Uuid, Agent>>,
    timers: RwLock<HashMap<Uuid, JoinHandle<()>>>,
    /// Count of agents not Offline. Adjusted exactly once per crossing;
    /// every mutation happens under the `agents` write lock.
    active: AtomicUsize,
    events: Arc<EventBus>,
    config: RegistryConfig,
}

/// Agent registry service.
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
    sweeper: RwLock<Option<JoinHandle<()>>>,
}

impl AgentRegistry {
    pub fn new(config: RegistryConfig, events: Arc<EventBus>) -> Self {
        let inner = Arc::new(RegistryInner {
            agents: RwLock::new(BoundedMap::new(config.max_agents)),
            timers: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
            events,
            config,
        });

        let registry = Self {
            inner,
            sweeper: RwLock::new(None),
        };
        registry.spawn_retention_sweep();
        registry
    }

    /// Register a new agent.
    ///
    /// Defaults are applied by [`Agent::from_registration`]; a liveness timer
    /// is spawned for the new agent. When the store is full the oldest entry
    /// is evicted to make room.
    pub async fn register(&self, registration: AgentRegistration) -> CoordinationResult<Agent> {
        if registration.name.trim().is_empty() {
            return Err(CoordinationError::ValidationFailed(
                "Agent name cannot be empty".to_string(),
            ));
        }

        let agent = Agent::from_registration(registration);
        let id = agent.id;

        {
            let mut agents = self.inner.agents.write().await;
            // Re-registering an existing id replaces the entry in place; its
            // gauge contribution only changes if the old entry was Offline.
            let replaced_active = agents.get(&id).map(|a| a.status != AgentStatus::Offline);
            match agents.insert_or_evict(id, agent.clone(), |_, _| true) {
                Ok(Some((evicted_id, evicted))) => {
                    warn!(agent_id = %evicted_id, "Evicting oldest agent to make room");
                    if evicted.status != AgentStatus::Offline {
                        self.inner.active.fetch_sub(1, Ordering::SeqCst);
                    }
                    self.abort_timer(evicted_id).await;
                    self.inner
                        .events
                        .publish(EventPayload::AgentEvicted { agent_id: evicted_id });
                }
                Ok(None) => {}
                Err(_) => return Err(CoordinationError::StoreFull),
            }
            if replaced_active != Some(true) {
                self.inner.active.fetch_add(1, Ordering::SeqCst);
            }
        }

        let timer = self.spawn_liveness_timer(id);
        {
            let mut timers = self.inner.timers.write().await;
            if let Some(old) = timers.insert(id, timer) {
                old.abort();
            }
        }

        info!(agent_id = %id, name = %agent.name, "Agent registered");
        self.inner.events.publish(EventPayload::AgentRegistered {
            agent_id: id,
            name: agent.name.clone(),
        });

        Ok(agent)
    }

    /// Unregister an agent, returning its final state so the caller can
    /// re-queue its in-flight tasks.
    pub async fn unregister(&self, id: Uuid) -> CoordinationResult<Agent> {
        let agent = {
            let mut agents = self.inner.agents.write().await;
            let agent = agents
                .remove(&id)
                .ok_or(CoordinationError::AgentNotFound(id))?;
            if agent.status != AgentStatus::Offline {
                self.inner.active.fetch_sub(1, Ordering::SeqCst);
            }
            agent
        };

        self.abort_timer(id).await;

        info!(agent_id = %id, "Agent unregistered");
        self.inner
            .events
            .publish(EventPayload::AgentUnregistered { agent_id: id });

        Ok(agent)
    }

    /// Record a heartbeat, reviving an Offline agent.
    pub async fn heartbeat(&self, id: Uuid) -> CoordinationResult<()> {
        let mut agents = self.inner.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or(CoordinationError::AgentNotFound(id))?;

        agent.touch_heartbeat();

        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Idle;
            self.inner.active.fetch_add(1, Ordering::SeqCst);
            info!(agent_id = %id, "Agent back online");
            self.inner.events.publish(EventPayload::AgentStatusChanged {
                agent_id: id,
                from: AgentStatus::Offline.to_string(),
                to: AgentStatus::Idle.to_string(),
            });
        }
        Ok(())
    }

    /// Update an agent's status.
    ///
    /// Offline is owned by liveness detection; callers cannot set it.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: AgentStatus,
        current_task_id: Option<Uuid>,
    ) -> CoordinationResult<()> {
        if status == AgentStatus::Offline {
            return Err(CoordinationError::InvalidTransition {
                entity: "agent",
                from: "caller".to_string(),
                to: AgentStatus::Offline.to_string(),
            });
        }

        let mut agents = self.inner.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or(CoordinationError::AgentNotFound(id))?;

        let old = agent.status;
        agent.status = status;
        agent.current_task_id = current_task_id;

        if old == AgentStatus::Offline {
            // Status changes imply the agent is responsive again.
            self.inner.active.fetch_add(1, Ordering::SeqCst);
        }

        if old != status {
            debug!(agent_id = %id, from = %old, to = %status, "Agent status changed");
            self.inner.events.publish(EventPayload::AgentStatusChanged {
                agent_id: id,
                from: old.to_string(),
                to: status.to_string(),
            });
        }
        Ok(())
    }

    /// Record a task outcome on the agent's counters.
    pub async fn record_result(&self, id: Uuid, success: bool) -> CoordinationResult<()> {
        let mut agents = self.inner.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or(CoordinationError::AgentNotFound(id))?;
        if success {
            agent.tasks_completed += 1;
        } else {
            agent.tasks_failed += 1;
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> CoordinationResult<Agent> {
        let agents = self.inner.agents.read().await;
        agents
            .get(&id)
            .cloned()
            .ok_or(CoordinationError::AgentNotFound(id))
    }

    pub async fn list(&self) -> Vec<Agent> {
        let agents = self.inner.agents.read().await;
        agents.values().cloned().collect()
    }

    /// Agents advertising the given capability tag.
    pub async fn find_by_capability(&self, capability: &str) -> Vec<Agent> {
        let agents = self.inner.agents.read().await;
        agents
            .values()
            .filter(|a| a.capabilities.contains(capability))
            .cloned()
            .collect()
    }

    /// Agents whose capability set covers every required tag.
    pub async fn find_capable(&self, required: &HashSet<String>) -> Vec<Agent> {
        let agents = self.inner.agents.read().await;
        agents
            .values()
            .filter(|a| a.has_capabilities(required))
            .cloned()
            .collect()
    }

    pub async fn find_by_status(&self, status: AgentStatus) -> Vec<Agent> {
        let agents = self.inner.agents.read().await;
        agents
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let agents = self.inner.agents.read().await;
        let mut stats = RegistryStats {
            total: agents.len(),
            idle: 0,
            busy: 0,
            offline: 0,
            error: 0,
            active: self.inner.active.load(Ordering::SeqCst),
            capabilities: HashMap::new(),
        };

        for agent in agents.values() {
            match agent.status {
                AgentStatus::Idle => stats.idle += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Offline => stats.offline += 1,
                AgentStatus::Error => stats.error += 1,
            }
            for capability in &agent.capabilities {
                *stats.capabilities.entry(capability.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    /// Abort all timers. The registry is unusable for liveness afterwards.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.write().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        if let Some(handle) = self.sweeper.write().await.take() {
            handle.abort();
        }
    }

    fn spawn_liveness_timer(&self, id: Uuid) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.heartbeat_timeout_secs;
        let poll = Duration::from_secs((timeout / 2).max(1));

        tokio::spawn(async move {
            let threshold = ChronoDuration::seconds(i64::try_from(timeout).unwrap_or(i64::MAX));
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;

                let mut agents = inner.agents.write().await;
                let Some(agent) = agents.get_mut(&id) else {
                    break;
                };
                if agent.status.is_available() && agent.is_stale(threshold) {
                    agent.status = AgentStatus::Offline;
                    let last_heartbeat = agent.last_heartbeat;
                    inner.active.fetch_sub(1, Ordering::SeqCst);
                    warn!(agent_id = %id, "Agent missed heartbeat, marking offline");
                    inner.events.publish(EventPayload::AgentWentOffline {
                        agent_id: id,
                        last_heartbeat,
                    });
                }
            }
        })
    }

    fn spawn_retention_sweep(&self) {
        let inner = Arc::clone(&self.inner);
        let period = Duration::from_secs(inner.config.retention_sweep_secs.max(1));
        let retention = ChronoDuration::seconds(
            i64::try_from(inner.config.offline_retention_secs).unwrap_or(i64::MAX),
        );

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;

                let removed = {
                    let mut agents = inner.agents.write().await;
                    agents.retain_collect(|_, agent| {
                        !(agent.status == AgentStatus::Offline && agent.is_stale(retention))
                    })
                };

                for id in removed {
                    debug!(agent_id = %id, "Dropping long-offline agent");
                    let mut timers = inner.timers.write().await;
                    if let Some(handle) = timers.remove(&id) {
                        handle.abort();
                    }
                    inner.events.publish(EventPayload::AgentEvicted { agent_id: id });
                }
            }
        });

        // Uncontended at construction time, so try_write always succeeds.
        if let Ok(mut slot) = self.sweeper.try_write() {
            *slot = Some(handle);
        }
    }

    async fn abort_timer(&self, id: Uuid) {
        let mut timers = self.inner.timers.write().await;
        if let Some(handle) = timers.remove(&id) {
            handle.abort();
        }
    }
}
