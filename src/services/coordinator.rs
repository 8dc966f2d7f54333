//! Coordination engine: composite-task decomposition, leveled execution,
//! and Saga-style compensation.
//!
//! A composite task is decomposed into a dependency graph, planned into
//! levels of independent subtasks, and executed level by level with bounded
//! concurrency. Every subtask of a level runs to an outcome before the next
//! level starts. Any failure stops forward progress and rolls back the
//! recorded successes in reverse completion order.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::models::config::CoordinatorConfig;
use crate::domain::models::{
    Agent, AgentStatus, CoordinatedStatus, CoordinatedTask, DependencyGraph, ExecutionPlan,
    Subtask, Task,
};
use crate::domain::ports::{MessageChannel, TaskDecomposer};
use crate::services::event_bus::{EventBus, EventPayload};
use crate::services::registry::AgentRegistry;

/// Coordinator statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

/// Coordination engine service.
pub struct CoordinationEngine {
    decomposers: tokio::sync::RwLock<HashMap<String, Arc<dyn TaskDecomposer>>>,
    tasks: tokio::sync::RwLock<HashMap<Uuid, CoordinatedTask>>,
    registry: Arc<AgentRegistry>,
    channel: Arc<dyn MessageChannel>,
    events: Arc<EventBus>,
    config: CoordinatorConfig,
}

impl CoordinationEngine {
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<AgentRegistry>,
        channel: Arc<dyn MessageChannel>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            decomposers: tokio::sync::RwLock::new(HashMap::new()),
            tasks: tokio::sync::RwLock::new(HashMap::new()),
            registry,
            channel,
            events,
            config,
        }
    }

    /// Register a decomposer for a task type, replacing any previous one.
    pub async fn register_decomposer(
        &self,
        task_type: impl Into<String>,
        decomposer: Arc<dyn TaskDecomposer>,
    ) {
        self.decomposers
            .write()
            .await
            .insert(task_type.into(), decomposer);
    }

    /// Decompose a composite task into subtasks.
    pub async fn decompose(&self, task: &Task) -> CoordinationResult<Vec<Subtask>> {
        let decomposer = self
            .decomposers
            .read()
            .await
            .get(&task.task_type)
            .cloned()
            .ok_or_else(|| CoordinationError::NoDecomposer(task.task_type.clone()))?;
        decomposer.decompose(task).await
    }

    /// Validate the dependency relation and compute the leveled plan.
    ///
    /// Unknown dependencies and cycles are rejected here, before anything
    /// is dispatched.
    pub fn build_plan(subtasks: &[Subtask]) -> CoordinationResult<ExecutionPlan> {
        let graph = DependencyGraph::build(subtasks)?;
        Ok(graph.execution_plan())
    }

    /// Run the full pipeline for a composite task: decompose, plan, execute
    /// level by level, roll back on failure.
    pub async fn execute(&self, task: &Task) -> CoordinationResult<CoordinatedTask> {
        let subtasks = self.decompose(task).await?;
        let plan = Self::build_plan(&subtasks)?;

        let mut coordinated =
            CoordinatedTask::new(task.id, task.task_type.clone(), subtasks, plan.clone());
        coordinated.status = CoordinatedStatus::Running;
        self.tasks
            .write()
            .await
            .insert(coordinated.id, coordinated.clone());

        info!(
            task_id = %coordinated.id,
            subtasks = coordinated.subtasks.len(),
            levels = plan.levels.len(),
            "Workflow started"
        );
        self.events.publish(EventPayload::WorkflowStarted {
            task_id: coordinated.id,
            subtask_count: coordinated.subtasks.len(),
            level_count: plan.levels.len(),
        });

        for (level_index, level) in plan.levels.iter().enumerate() {
            {
                let mut tasks = self.tasks.write().await;
                if let Some(stored) = tasks.get_mut(&coordinated.id) {
                    stored.current_level = level_index;
                }
            }
            self.events.publish(EventPayload::LevelStarted {
                task_id: coordinated.id,
                level: level_index,
                subtask_count: level.len(),
            });

            let failures = self.run_level(coordinated.id, level).await;

            let succeeded = level.len() - failures;
            self.events.publish(EventPayload::LevelCompleted {
                task_id: coordinated.id,
                level: level_index,
                succeeded,
                failed: failures,
            });

            if failures > 0 {
                warn!(
                    task_id = %coordinated.id,
                    level = level_index,
                    failures,
                    "Level failed, rolling back"
                );
                {
                    let mut tasks = self.tasks.write().await;
                    if let Some(stored) = tasks.get_mut(&coordinated.id) {
                        stored.status = CoordinatedStatus::Failed;
                    }
                }
                self.rollback(coordinated.id).await?;

                let errors = self
                    .get(coordinated.id)
                    .await
                    .map(|t| t.errors)
                    .unwrap_or_default();
                return Err(CoordinationError::ExecutionFailed(format!(
                    "workflow {} failed at level {level_index}: {errors:?}",
                    coordinated.id
                )));
            }
        }

        let finished = {
            let mut tasks = self.tasks.write().await;
            let stored = tasks
                .get_mut(&coordinated.id)
                .ok_or(CoordinationError::CoordinatedTaskNotFound(coordinated.id))?;
            stored.finish(CoordinatedStatus::Completed);
            stored.clone()
        };

        info!(task_id = %finished.id, "Workflow completed");
        self.events.publish(EventPayload::WorkflowFinished {
            task_id: finished.id,
            status: finished.status.as_str().to_string(),
        });
        Ok(finished)
    }

    /// Dispatch one level with bounded concurrency and wait for every
    /// outcome. Returns the number of failed subtasks.
    async fn run_level(&self, task_id: Uuid, level: &[String]) -> usize {
        let subtasks: Vec<Subtask> = {
            let tasks = self.tasks.read().await;
            let Some(stored) = tasks.get(&task_id) else {
                return level.len();
            };
            level
                .iter()
                .filter_map(|id| stored.subtask(id).cloned())
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_subtasks));
        let timeout = Duration::from_secs(self.config.subtask_timeout_secs);
        let (tx, mut rx) = mpsc::channel::<(String, CoordinationResult<Value>)>(level.len().max(1));

        for subtask in subtasks {
            let semaphore = Arc::clone(&semaphore);
            let channel = Arc::clone(&self.channel);
            let registry = Arc::clone(&self.registry);
            let tx = tx.clone();
            let timeout_secs = self.config.subtask_timeout_secs;

            tokio::spawn(async move {
                // Closed semaphore is impossible here; fall through to an error.
                let Ok(_permit) = semaphore.acquire().await else {
                    let _ = tx
                        .send((
                            subtask.id.clone(),
                            Err(CoordinationError::ShuttingDown),
                        ))
                        .await;
                    return;
                };

                let outcome = match pick_agent(&registry, &subtask.required_capability).await {
                    Some(agent) => {
                        let request = json!({
                            "subtask_id": subtask.id,
                            "name": subtask.name,
                            "payload": subtask.payload,
                        });
                        match tokio::time::timeout(
                            timeout,
                            channel.send_request(agent.id, "execute", request),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(CoordinationError::Timeout {
                                what: format!("subtask {}", subtask.id),
                                secs: timeout_secs,
                            }),
                        }
                    }
                    None => Err(CoordinationError::ExecutionFailed(format!(
                        "no available agent for capability {}",
                        subtask.required_capability
                    ))),
                };

                let _ = tx.send((subtask.id, outcome)).await;
            });
        }
        drop(tx);

        let mut failures = 0;
        while let Some((subtask_id, outcome)) = rx.recv().await {
            let mut tasks = self.tasks.write().await;
            let Some(stored) = tasks.get_mut(&task_id) else {
                continue;
            };
            match outcome {
                Ok(result) => {
                    debug!(task_id = %task_id, subtask = %subtask_id, "Subtask completed");
                    stored.record_success(&subtask_id, result);
                    self.events.publish(EventPayload::SubtaskCompleted {
                        task_id,
                        subtask_id,
                    });
                }
                Err(e) => {
                    failures += 1;
                    warn!(task_id = %task_id, subtask = %subtask_id, error = %e, "Subtask failed");
                    stored.record_failure(&subtask_id, e.to_string());
                    self.events.publish(EventPayload::SubtaskFailed {
                        task_id,
                        subtask_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        failures
    }

    /// Compensate recorded successes in reverse completion order.
    ///
    /// Compensation failures are logged and do not stop the loop; partial
    /// rollback still ends in `RolledBack`.
    pub async fn rollback(&self, task_id: Uuid) -> CoordinationResult<()> {
        let (order, subtasks) = {
            let tasks = self.tasks.read().await;
            let stored = tasks
                .get(&task_id)
                .ok_or(CoordinationError::CoordinatedTaskNotFound(task_id))?;
            (stored.completion_order.clone(), stored.subtasks.clone())
        };

        let compensations = order
            .iter()
            .filter(|id| {
                subtasks
                    .iter()
                    .any(|s| s.id == **id && s.compensation.is_some())
            })
            .count();
        self.events.publish(EventPayload::RollbackStarted {
            task_id,
            compensations,
        });
        info!(task_id = %task_id, compensations, "Rolling back workflow");

        for subtask_id in order.iter().rev() {
            let Some(subtask) = subtasks.iter().find(|s| &s.id == subtask_id) else {
                continue;
            };
            let Some(compensation) = &subtask.compensation else {
                continue;
            };

            let outcome = match pick_agent(&self.registry, &subtask.required_capability).await {
                Some(agent) => {
                    self.channel
                        .send_request(
                            agent.id,
                            &compensation.action,
                            json!({
                                "subtask_id": subtask.id,
                                "payload": compensation.payload,
                            }),
                        )
                        .await
                }
                None => Err(CoordinationError::ExecutionFailed(format!(
                    "no available agent for capability {}",
                    subtask.required_capability
                ))),
            };

            if let Err(e) = outcome {
                error!(task_id = %task_id, subtask = %subtask_id, error = %e, "Compensation failed");
                self.events.publish(EventPayload::CompensationFailed {
                    task_id,
                    subtask_id: subtask_id.clone(),
                    error: e.to_string(),
                });
            } else {
                debug!(task_id = %task_id, subtask = %subtask_id, "Compensated");
            }
        }

        {
            let mut tasks = self.tasks.write().await;
            if let Some(stored) = tasks.get_mut(&task_id) {
                stored.finish(CoordinatedStatus::RolledBack);
            }
        }
        self.events.publish(EventPayload::WorkflowFinished {
            task_id,
            status: CoordinatedStatus::RolledBack.as_str().to_string(),
        });
        Ok(())
    }

    /// External completion callback: record a subtask result against the
    /// active coordinated task that owns it.
    pub async fn handle_subtask_completion(
        &self,
        subtask_id: &str,
        result: Value,
    ) -> CoordinationResult<Uuid> {
        let mut tasks = self.tasks.write().await;
        let owner = tasks.values_mut().find(|t| {
            t.status == CoordinatedStatus::Running && t.subtask(subtask_id).is_some()
        });
        let Some(owner) = owner else {
            return Err(CoordinationError::SubtaskNotFound(subtask_id.to_string()));
        };

        owner.record_success(subtask_id, result);
        let task_id = owner.id;
        self.events.publish(EventPayload::SubtaskCompleted {
            task_id,
            subtask_id: subtask_id.to_string(),
        });
        Ok(task_id)
    }

    pub async fn get(&self, task_id: Uuid) -> CoordinationResult<CoordinatedTask> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(CoordinationError::CoordinatedTaskNotFound(task_id))
    }

    pub async fn status(&self, task_id: Uuid) -> CoordinationResult<CoordinatedStatus> {
        Ok(self.get(task_id).await?.status)
    }

    /// Coordinated tasks not yet in a terminal state.
    pub async fn list_active(&self) -> Vec<CoordinatedTask> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Drop terminal coordinated tasks, returning how many were removed.
    pub async fn prune_finished(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| !t.status.is_terminal());
        before - tasks.len()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let tasks = self.tasks.read().await;
        let mut stats = CoordinatorStats {
            total: tasks.len(),
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            rolled_back: 0,
        };
        for task in tasks.values() {
            match task.status {
                CoordinatedStatus::Pending => stats.pending += 1,
                CoordinatedStatus::Running => stats.running += 1,
                CoordinatedStatus::Completed => stats.completed += 1,
                CoordinatedStatus::Failed => stats.failed += 1,
                CoordinatedStatus::RolledBack => stats.rolled_back += 1,
            }
        }
        stats
    }

    /// Wait up to `shutdown_wait_secs` for active workflows to finish.
    pub async fn shutdown(&self) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.shutdown_wait_secs);
        loop {
            let active = self.list_active().await.len();
            if active == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "Shutting down with workflows still active");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// First Idle agent with the capability, else any available one.
async fn pick_agent(registry: &AgentRegistry, capability: &str) -> Option<Agent> {
    let candidates = registry.find_by_capability(capability).await;
    candidates
        .iter()
        .find(|a| a.status == AgentStatus::Idle)
        .or_else(|| candidates.iter().find(|a| a.status.is_available()))
        .cloned()
}
