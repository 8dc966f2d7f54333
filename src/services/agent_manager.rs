//! Agent manager: task lifecycle and capability/load-aware assignment.
//!
//! Owns a bounded task store and a pending queue sorted descending by
//! priority (FIFO within a priority band). Assignment validates capability
//! coverage and per-agent capacity; execution is spawned per assignment
//! through the [`AgentRunner`] port when one is registered for the agent.

use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::models::config::ManagerConfig;
use crate::domain::models::{Agent, AgentStatus, Task, TaskRequest, TaskStatus};
use crate::domain::ports::{AgentRunner, TaskRouter};
use crate::services::bounded_map::BoundedMap;
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::registry::AgentRegistry;

/// Agent selection strategy applied when several candidates qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Rotating cursor per distinct capability signature.
    RoundRobin,
    /// Fewest in-flight tasks; ties break by candidate order.
    LeastLoaded,
    /// Uniform random choice.
    Random,
    /// Idle agents first, least loaded within each group.
    PriorityAware,
}

impl FromStr for SelectionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "least_loaded" => Ok(Self::LeastLoaded),
            "random" => Ok(Self::Random),
            "priority_aware" => Ok(Self::PriorityAware),
            other => Err(anyhow::anyhow!("Invalid selection strategy: {other}")),
        }
    }
}

/// Manager statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queue_depth: usize,
    pub per_agent_load: HashMap<Uuid, usize>,
}

struct ManagerInner {
    tasks: RwLock<BoundedMap<Uuid, Task>>,
    /// Task ids sorted descending by priority, FIFO within equal priority.
    pending: RwLock<Vec<Uuid>>,
    /// In-flight (Assigned or InProgress) task count per agent.
    in_flight: RwLock<HashMap<Uuid, usize>>,
    runners: RwLock<HashMap<Uuid, Arc<dyn AgentRunner>>>,
    router: RwLock<Option<Arc<dyn TaskRouter>>>,
    /// Round-robin cursor per capability signature.
    cursors: RwLock<HashMap<String, usize>>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventBus>,
    config: ManagerConfig,
    strategy: SelectionStrategy,
}

impl ManagerInner {
    /// Decrement the agent's in-flight count, returning it to Idle when the
    /// last slot frees up.
    async fn release_slot(&self, agent_id: Uuid) {
        let remaining = {
            let mut in_flight = self.in_flight.write().await;
            match in_flight.get_mut(&agent_id) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            }
        };
        if remaining == 0 {
            if let Err(e) = self
                .registry
                .update_status(agent_id, AgentStatus::Idle, None)
                .await
            {
                debug!(agent_id = %agent_id, error = %e, "Could not return agent to idle");
            }
        }
    }
}

/// Task assignment and lifecycle service.
pub struct AgentManager {
    inner: Arc<ManagerInner>,
    dispatcher: RwLock<Option<JoinHandle<()>>>,
}

impl AgentManager {
    pub fn new(
        config: ManagerConfig,
        registry: Arc<AgentRegistry>,
        events: Arc<EventBus>,
    ) -> CoordinationResult<Self> {
        let strategy = SelectionStrategy::from_str(&config.selection_strategy)
            .map_err(|e| CoordinationError::ValidationFailed(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(ManagerInner {
                tasks: RwLock::new(BoundedMap::new(config.max_tasks)),
                pending: RwLock::new(Vec::new()),
                in_flight: RwLock::new(HashMap::new()),
                runners: RwLock::new(HashMap::new()),
                router: RwLock::new(None),
                cursors: RwLock::new(HashMap::new()),
                registry,
                events,
                config,
                strategy,
            }),
            dispatcher: RwLock::new(None),
        })
    }

    /// Install the optional external ranking port.
    pub async fn set_router(&self, router: Arc<dyn TaskRouter>) {
        *self.inner.router.write().await = Some(router);
    }

    /// Register an execution handle for an agent. Assignments to this agent
    /// will spawn the runner.
    pub async fn register_runner(&self, agent_id: Uuid, runner: Arc<dyn AgentRunner>) {
        self.inner.runners.write().await.insert(agent_id, runner);
    }

    /// Create a task and enqueue it for dispatch.
    pub async fn create_task(&self, request: TaskRequest) -> CoordinationResult<Task> {
        let task = Task::from_request(request);
        task.validate()?;

        {
            let mut tasks = self.inner.tasks.write().await;
            // Only terminal entries may be evicted; live work is never dropped.
            tasks
                .insert_or_evict(task.id, task.clone(), |_, t| t.is_terminal())
                .map_err(|_| CoordinationError::StoreFull)?;
        }

        self.enqueue_pending(task.id, task.priority).await;

        info!(task_id = %task.id, task_type = %task.task_type, "Task created");
        self.inner.events.publish(EventPayload::TaskSubmitted {
            task_id: task.id,
            task_type: task.task_type.clone(),
            priority: task.priority,
        });

        Ok(task)
    }

    /// Agents that can take this task right now: capability superset,
    /// available status, and below the per-agent concurrency ceiling.
    pub async fn find_capable_agents(&self, task: &Task) -> Vec<Agent> {
        let candidates = self
            .inner
            .registry
            .find_capable(&task.required_capabilities)
            .await;
        let in_flight = self.inner.in_flight.read().await;

        candidates
            .into_iter()
            .filter(|agent| {
                agent.status.is_available()
                    && in_flight.get(&agent.id).copied().unwrap_or(0)
                        < self.inner.config.max_tasks_per_agent
            })
            .collect()
    }

    /// Pick an agent for the task from qualified candidates.
    ///
    /// An installed [`TaskRouter`] is consulted first; its failure falls back
    /// to the configured strategy and is never surfaced to the caller.
    pub async fn select_agent(&self, task: &Task, candidates: &[Agent]) -> Option<Uuid> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(router) = self.inner.router.read().await.clone() {
            match router.rank(task, candidates).await {
                Ok(choice) if candidates.iter().any(|a| a.id == choice) => return Some(choice),
                Ok(choice) => {
                    warn!(task_id = %task.id, agent_id = %choice, "Router picked a non-candidate, falling back");
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Router failed, falling back to strategy");
                }
            }
        }

        match self.inner.strategy {
            SelectionStrategy::RoundRobin => {
                let mut signature: Vec<&str> = task
                    .required_capabilities
                    .iter()
                    .map(String::as_str)
                    .collect();
                signature.sort_unstable();
                let signature = signature.join(",");

                let mut cursors = self.inner.cursors.write().await;
                let cursor = cursors.entry(signature).or_insert(0);
                let choice = candidates[*cursor % candidates.len()].id;
                *cursor = cursor.wrapping_add(1);
                Some(choice)
            }
            SelectionStrategy::LeastLoaded => {
                let in_flight = self.inner.in_flight.read().await;
                candidates
                    .iter()
                    .min_by_key(|a| in_flight.get(&a.id).copied().unwrap_or(0))
                    .map(|a| a.id)
            }
            SelectionStrategy::Random => candidates.choose(&mut rand::thread_rng()).map(|a| a.id),
            SelectionStrategy::PriorityAware => {
                let in_flight = self.inner.in_flight.read().await;
                let load = |a: &Agent| in_flight.get(&a.id).copied().unwrap_or(0);

                let idle: Vec<&Agent> = candidates
                    .iter()
                    .filter(|a| a.status == AgentStatus::Idle)
                    .collect();
                if idle.is_empty() {
                    candidates.iter().min_by_key(|a| load(a)).map(|a| a.id)
                } else {
                    idle.iter().min_by_key(|a| load(a)).map(|a| a.id)
                }
            }
        }
    }

    /// Assign a pending task to an agent, validating capability coverage and
    /// capacity, then spawn execution if a runner is registered.
    pub async fn assign_task(&self, task_id: Uuid, agent_id: Uuid) -> CoordinationResult<()> {
        let agent = self.inner.registry.get(agent_id).await?;

        if !agent.status.is_available() {
            return Err(CoordinationError::InvalidTransition {
                entity: "agent",
                from: agent.status.to_string(),
                to: "assigned work".to_string(),
            });
        }

        // Reserve a slot up front: the ceiling check and the increment share
        // one write guard, so two concurrent assignments cannot both slip
        // under the limit.
        {
            let mut in_flight = self.inner.in_flight.write().await;
            let count = in_flight.entry(agent_id).or_insert(0);
            if *count >= self.inner.config.max_tasks_per_agent {
                return Err(CoordinationError::CapacityExceeded {
                    agent: agent_id,
                    limit: self.inner.config.max_tasks_per_agent,
                });
            }
            *count += 1;
        }

        let claimed: CoordinationResult<Task> = {
            let mut tasks = self.inner.tasks.write().await;
            match tasks.get_mut(&task_id) {
                None => Err(CoordinationError::TaskNotFound(task_id)),
                Some(task) if !agent.has_capabilities(&task.required_capabilities) => {
                    Err(CoordinationError::CapabilityMismatch {
                        agent: agent_id,
                        missing: agent.missing_capabilities(&task.required_capabilities),
                    })
                }
                Some(task) => task.transition_to(TaskStatus::Assigned).map(|()| {
                    task.assigned_agent_id = Some(agent_id);
                    task.clone()
                }),
            }
        };
        let task = match claimed {
            Ok(task) => task,
            Err(e) => {
                // The task was never claimed, so give the reserved slot back.
                let mut in_flight = self.inner.in_flight.write().await;
                if let Some(count) = in_flight.get_mut(&agent_id) {
                    *count = count.saturating_sub(1);
                }
                return Err(e);
            }
        };

        self.remove_pending(task_id).await;
        self.inner
            .registry
            .update_status(agent_id, AgentStatus::Busy, Some(task_id))
            .await?;

        info!(task_id = %task_id, agent_id = %agent_id, "Task assigned");
        self.inner
            .events
            .publish(EventPayload::TaskAssigned { task_id, agent_id });

        let runner = self.inner.runners.read().await.get(&agent_id).cloned();
        if let Some(runner) = runner {
            self.spawn_execution(task, agent_id, runner);
        }

        Ok(())
    }

    /// Try to dispatch every pending task once. Tasks with no capable agent
    /// stay queued for the next tick.
    pub async fn dispatch_pending(&self) {
        let queue: Vec<Uuid> = self.inner.pending.read().await.clone();

        for task_id in queue {
            let task = {
                let tasks = self.inner.tasks.read().await;
                tasks.get(&task_id).cloned()
            };
            let Some(task) = task else {
                self.remove_pending(task_id).await;
                continue;
            };
            if task.status != TaskStatus::Pending {
                self.remove_pending(task_id).await;
                continue;
            }

            let candidates = self.find_capable_agents(&task).await;
            let Some(agent_id) = self.select_agent(&task, &candidates).await else {
                continue;
            };

            if let Err(e) = self.assign_task(task_id, agent_id).await {
                debug!(task_id = %task_id, agent_id = %agent_id, error = %e, "Dispatch attempt failed");
            }
        }
    }

    /// Start the periodic dispatch loop.
    pub async fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let period = Duration::from_millis(self.inner.config.dispatch_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                manager.dispatch_pending().await;
            }
        });
        if let Some(old) = self.dispatcher.write().await.replace(handle) {
            old.abort();
        }
    }

    /// Return every in-flight task of a removed agent to the pending queue.
    pub async fn handle_agent_unregistered(&self, agent_id: Uuid) -> CoordinationResult<usize> {
        let requeued: Vec<(Uuid, i32)> = {
            let mut tasks = self.inner.tasks.write().await;
            let mut requeued = Vec::new();
            for task in tasks.values_mut() {
                if task.assigned_agent_id == Some(agent_id)
                    && matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress)
                {
                    task.transition_to(TaskStatus::Pending)?;
                    requeued.push((task.id, task.priority));
                }
            }
            requeued
        };

        for &(task_id, priority) in &requeued {
            self.enqueue_pending(task_id, priority).await;
            self.inner.events.publish(EventPayload::TaskRequeued {
                task_id,
                reason: "agent unregistered".to_string(),
            });
        }

        self.inner.in_flight.write().await.remove(&agent_id);
        self.inner.runners.write().await.remove(&agent_id);

        if !requeued.is_empty() {
            info!(agent_id = %agent_id, count = requeued.len(), "Re-queued tasks of unregistered agent");
        }
        Ok(requeued.len())
    }

    /// Cancel a non-terminal task.
    pub async fn cancel_task(&self, task_id: Uuid) -> CoordinationResult<()> {
        let assigned_agent = {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(&task_id)
                .ok_or(CoordinationError::TaskNotFound(task_id))?;
            let agent = task.assigned_agent_id;
            let was_in_flight =
                matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress);
            task.transition_to(TaskStatus::Cancelled)?;
            if was_in_flight { agent } else { None }
        };

        self.remove_pending(task_id).await;

        if let Some(agent_id) = assigned_agent {
            self.inner.release_slot(agent_id).await;
        }

        info!(task_id = %task_id, "Task cancelled");
        self.inner
            .events
            .publish(EventPayload::TaskCancelled { task_id });
        Ok(())
    }

    pub async fn get_task(&self, task_id: Uuid) -> CoordinationResult<Task> {
        let tasks = self.inner.tasks.read().await;
        tasks
            .get(&task_id)
            .cloned()
            .ok_or(CoordinationError::TaskNotFound(task_id))
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.inner.tasks.read().await;
        tasks.values().cloned().collect()
    }

    pub async fn stats(&self) -> ManagerStats {
        let tasks = self.inner.tasks.read().await;
        let mut stats = ManagerStats {
            total_tasks: tasks.len(),
            pending: 0,
            assigned: 0,
            in_progress: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            queue_depth: self.inner.pending.read().await.len(),
            per_agent_load: self.inner.in_flight.read().await.clone(),
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Stop the dispatch loop.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatcher.write().await.take() {
            handle.abort();
        }
    }

    /// Insert into the pending queue keeping descending priority order,
    /// FIFO within a band.
    async fn enqueue_pending(&self, task_id: Uuid, priority: i32) {
        let tasks = self.inner.tasks.read().await;
        let mut pending = self.inner.pending.write().await;
        if pending.contains(&task_id) {
            return;
        }
        let position = pending
            .iter()
            .position(|id| {
                tasks
                    .get(id)
                    .is_some_and(|t| t.priority < priority)
            })
            .unwrap_or(pending.len());
        pending.insert(position, task_id);
    }

    async fn remove_pending(&self, task_id: Uuid) {
        let mut pending = self.inner.pending.write().await;
        if let Some(pos) = pending.iter().position(|id| *id == task_id) {
            pending.remove(pos);
        }
    }

    fn spawn_execution(&self, task: Task, agent_id: Uuid, runner: Arc<dyn AgentRunner>) {
        let inner = Arc::clone(&self.inner);
        let task_id = task.id;

        tokio::spawn(async move {
            // Mark started.
            {
                let mut tasks = inner.tasks.write().await;
                let Some(stored) = tasks.get_mut(&task_id) else {
                    return;
                };
                if stored.transition_to(TaskStatus::InProgress).is_err() {
                    // Cancelled or re-queued before execution began.
                    return;
                }
            }
            inner
                .events
                .publish(EventPayload::TaskStarted { task_id, agent_id });

            let outcome = runner.run(&task).await;

            // Apply the terminal state only if the task is still ours; a
            // cancel or re-queue in the meantime already released the slot.
            let applied = {
                let mut tasks = inner.tasks.write().await;
                match tasks.get_mut(&task_id) {
                    Some(stored)
                        if stored.status == TaskStatus::InProgress
                            && stored.assigned_agent_id == Some(agent_id) =>
                    {
                        match &outcome {
                            Ok(result) => {
                                let _ = stored.transition_to(TaskStatus::Completed);
                                stored.result = Some(result.clone());
                            }
                            Err(e) => {
                                let _ = stored.transition_to(TaskStatus::Failed);
                                stored.error = Some(e.to_string());
                            }
                        }
                        true
                    }
                    _ => false,
                }
            };

            if !applied {
                return;
            }

            let success = outcome.is_ok();
            if let Err(e) = inner.registry.record_result(agent_id, success).await {
                debug!(agent_id = %agent_id, error = %e, "Could not record task outcome");
            }
            inner.release_slot(agent_id).await;

            match outcome {
                Ok(_) => {
                    info!(task_id = %task_id, agent_id = %agent_id, "Task completed");
                    inner
                        .events
                        .publish(EventPayload::TaskCompleted { task_id, agent_id });
                }
                Err(e) => {
                    warn!(task_id = %task_id, agent_id = %agent_id, error = %e, "Task failed");
                    inner.events.publish(EventPayload::TaskFailed {
                        task_id,
                        agent_id: Some(agent_id),
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentRegistration;
    use crate::domain::models::config::RegistryConfig;
    use crate::services::event_bus::EventBusConfig;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct OkRunner;

    #[async_trait]
    impl AgentRunner for OkRunner {
        async fn run(&self, _task: &Task) -> CoordinationResult<Value> {
            Ok(json!({"ok": true}))
        }
    }

    async fn setup() -> (Arc<AgentRegistry>, AgentManager) {
        let events = Arc::new(EventBus::new(EventBusConfig::default()));
        let registry = Arc::new(AgentRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&events),
        ));
        let manager =
            AgentManager::new(ManagerConfig::default(), Arc::clone(&registry), events).unwrap();
        (registry, manager)
    }

    #[tokio::test]
    async fn test_create_and_queue_order() {
        let (registry, manager) = setup().await;

        let low = manager
            .create_task(TaskRequest::new("t").with_priority(1))
            .await
            .unwrap();
        let high = manager
            .create_task(TaskRequest::new("t").with_priority(9))
            .await
            .unwrap();
        let mid = manager
            .create_task(TaskRequest::new("t").with_priority(5))
            .await
            .unwrap();

        let pending = manager.inner.pending.read().await.clone();
        assert_eq!(pending, vec![high.id, mid.id, low.id]);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_fifo_within_priority_band() {
        let (registry, manager) = setup().await;

        let first = manager
            .create_task(TaskRequest::new("t").with_priority(5))
            .await
            .unwrap();
        let second = manager
            .create_task(TaskRequest::new("t").with_priority(5))
            .await
            .unwrap();

        let pending = manager.inner.pending.read().await.clone();
        assert_eq!(pending, vec![first.id, second.id]);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_capability_mismatch() {
        let (registry, manager) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("w1").with_capability("x"))
            .await
            .unwrap();
        let task = manager
            .create_task(
                TaskRequest::new("t")
                    .with_capability("x")
                    .with_capability("y"),
            )
            .await
            .unwrap();

        let err = manager.assign_task(task.id, agent.id).await.unwrap_err();
        match err {
            CoordinationError::CapabilityMismatch { missing, .. } => {
                assert_eq!(missing, vec!["y".to_string()]);
            }
            other => panic!("Expected CapabilityMismatch, got {other:?}"),
        }
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_capability_never_qualifies() {
        let (registry, manager) = setup().await;
        registry
            .register(AgentRegistration::new("w1").with_capability("x"))
            .await
            .unwrap();
        let task = manager
            .create_task(
                TaskRequest::new("t")
                    .with_capability("x")
                    .with_capability("y"),
            )
            .await
            .unwrap();

        assert!(manager.find_capable_agents(&task).await.is_empty());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_capacity_ceiling() {
        let (registry, manager) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("w1"))
            .await
            .unwrap();

        // Fill the agent to its ceiling (default 3), no runner so tasks stay Assigned.
        for _ in 0..3 {
            let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
            manager.assign_task(task.id, agent.id).await.unwrap();
        }

        let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
        let err = manager.assign_task(task.id, agent.id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::CapacityExceeded { .. }));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_assignments_respect_ceiling() {
        let events = Arc::new(EventBus::new(EventBusConfig::default()));
        let registry = Arc::new(AgentRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&events),
        ));
        let config = ManagerConfig {
            max_tasks_per_agent: 1,
            ..ManagerConfig::default()
        };
        let manager = AgentManager::new(config, Arc::clone(&registry), events).unwrap();
        let agent = registry
            .register(AgentRegistration::new("w1"))
            .await
            .unwrap();

        let first = manager.create_task(TaskRequest::new("t")).await.unwrap();
        let second = manager.create_task(TaskRequest::new("t")).await.unwrap();

        // No runner registered, so neither assignment frees its slot.
        let (a, b) = tokio::join!(
            manager.assign_task(first.id, agent.id),
            manager.assign_task(second.id, agent.id),
        );

        assert_eq!(
            usize::from(a.is_ok()) + usize::from(b.is_ok()),
            1,
            "exactly one assignment may land on a ceiling-1 agent"
        );
        let rejected = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(rejected, CoordinationError::CapacityExceeded { .. }));
        assert_eq!(
            manager
                .stats()
                .await
                .per_agent_load
                .get(&agent.id)
                .copied()
                .unwrap_or(0),
            1
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_claim_releases_reserved_slot() {
        let (registry, manager) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("w1").with_capability("x"))
            .await
            .unwrap();
        let task = manager
            .create_task(TaskRequest::new("t").with_capability("y"))
            .await
            .unwrap();

        let err = manager.assign_task(task.id, agent.id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::CapabilityMismatch { .. }));
        assert_eq!(
            manager
                .stats()
                .await
                .per_agent_load
                .get(&agent.id)
                .copied()
                .unwrap_or(0),
            0,
            "rejected assignment must not hold a slot"
        );
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_assignment_with_runner_completes() {
        let (registry, manager) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("w1"))
            .await
            .unwrap();
        manager.register_runner(agent.id, Arc::new(OkRunner)).await;

        let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
        manager.assign_task(task.id, agent.id).await.unwrap();

        // Poll for terminal state.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let current = manager.get_task(task.id).await.unwrap();
            if current.is_terminal() {
                assert_eq!(current.status, TaskStatus::Completed);
                assert_eq!(current.result, Some(json!({"ok": true})));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "task never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Slot freed and agent idle again.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let current = registry.get(agent.id).await.unwrap();
            if current.status == AgentStatus::Idle {
                assert_eq!(current.tasks_completed, 1);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "agent never idled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_requeues_tasks() {
        let (registry, manager) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("w1"))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
            manager.assign_task(task.id, agent.id).await.unwrap();
            ids.push(task.id);
        }

        registry.unregister(agent.id).await.unwrap();
        let count = manager.handle_agent_unregistered(agent.id).await.unwrap();
        assert_eq!(count, 3);

        for id in ids {
            let task = manager.get_task(id).await.unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(task.assigned_agent_id.is_none());
        }
        assert_eq!(manager.stats().await.queue_depth, 3);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_terminal_rejected() {
        let (registry, manager) = setup().await;
        let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
        manager.cancel_task(task.id).await.unwrap();

        let err = manager.cancel_task(task.id).await.unwrap_err();
        assert!(err.is_policy_violation());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_least_loaded_selection() {
        let (registry, manager) = setup().await;
        let a = registry
            .register(AgentRegistration::new("a"))
            .await
            .unwrap();
        let b = registry
            .register(AgentRegistration::new("b"))
            .await
            .unwrap();

        let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
        manager.assign_task(task.id, a.id).await.unwrap();

        let next = manager.create_task(TaskRequest::new("t")).await.unwrap();
        let candidates = manager.find_capable_agents(&next).await;
        let choice = manager.select_agent(&next, &candidates).await;
        assert_eq!(choice, Some(b.id));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_round_robin_cycles() {
        let events = Arc::new(EventBus::new(EventBusConfig::default()));
        let registry = Arc::new(AgentRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&events),
        ));
        let config = ManagerConfig {
            selection_strategy: "round_robin".to_string(),
            ..ManagerConfig::default()
        };
        let manager = AgentManager::new(config, Arc::clone(&registry), events).unwrap();

        registry
            .register(AgentRegistration::new("a"))
            .await
            .unwrap();
        registry
            .register(AgentRegistration::new("b"))
            .await
            .unwrap();

        let task = manager.create_task(TaskRequest::new("t")).await.unwrap();
        let candidates = manager.find_capable_agents(&task).await;
        assert_eq!(candidates.len(), 2);

        let first = manager.select_agent(&task, &candidates).await.unwrap();
        let second = manager.select_agent(&task, &candidates).await.unwrap();
        let third = manager.select_agent(&task, &candidates).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_skips_unmatchable() {
        let (registry, manager) = setup().await;
        let task = manager
            .create_task(TaskRequest::new("t").with_capability("exotic"))
            .await
            .unwrap();

        manager.dispatch_pending().await;
        assert_eq!(
            manager.get_task(task.id).await.unwrap().status,
            TaskStatus::Pending
        );
        assert_eq!(manager.stats().await.queue_depth, 1);
        registry.shutdown().await;
    }
}
