//! Self-healing manager: exponential-backoff agent restarts with a rolling
//! attempt budget, and critical-failure escalation.
//!
//! Failures of agents with a registered manifest schedule a restart after
//! `base_backoff × 2^attempts`. Attempts are counted inside a trailing
//! window; exhausting the budget escalates instead of restarting again.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::config::HealingConfig;
use crate::domain::ports::{AgentLifecycle, AlertSink, Discovery};
use crate::services::event_bus::{EventBus, EventPayload};

/// How important an agent is to the overall system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

/// Healing policy for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    /// Agent name, forwarded to the lifecycle port on restart.
    pub name: String,
    /// Capability used for substitute discovery and replacement start.
    pub capability: String,
    /// Whether failures of this agent trigger automatic restarts.
    pub auto_restart: bool,
    pub criticality: Criticality,
}

impl AgentManifest {
    pub fn new(name: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability: capability.into(),
            auto_restart: true,
            criticality: Criticality::Medium,
        }
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn without_auto_restart(mut self) -> Self {
        self.auto_restart = false;
        self
    }
}

/// Healing statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealingStats {
    pub manifests: usize,
    pub agents_with_history: usize,
    pub pending_restarts: usize,
    pub total_recorded_attempts: usize,
}

struct HealingInner {
    manifests: RwLock<HashMap<Uuid, AgentManifest>>,
    /// Restart attempt timestamps per agent, oldest first.
    history: RwLock<HashMap<Uuid, Vec<DateTime<Utc>>>>,
    /// Pending restart timers, one per agent.
    timers: RwLock<HashMap<Uuid, JoinHandle<()>>>,
    /// Failed restarts are fed back through this channel and drained by a
    /// worker task, so `restart` never re-enters `handle_failure` directly.
    failures: mpsc::UnboundedSender<(Uuid, String)>,
    lifecycle: Arc<dyn AgentLifecycle>,
    discovery: Arc<dyn Discovery>,
    alerts: Arc<dyn AlertSink>,
    events: Arc<EventBus>,
    config: HealingConfig,
}

impl HealingInner {
    /// Attempts recorded inside the trailing window.
    async fn attempts_in_window(&self, agent_id: Uuid) -> u32 {
        let cutoff = Utc::now()
            - ChronoDuration::seconds(
                i64::try_from(self.config.attempt_window_secs).unwrap_or(i64::MAX),
            );
        let history = self.history.read().await;
        let count = history
            .get(&agent_id)
            .map_or(0, |attempts| attempts.iter().filter(|t| **t > cutoff).count());
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// React to an agent failure: schedule a backed-off restart, or escalate
    /// when the attempt budget is exhausted.
    async fn handle_failure(self: &Arc<Self>, agent_id: Uuid, reason: &str) {
        let manifest = {
            let manifests = self.manifests.read().await;
            manifests.get(&agent_id).cloned()
        };
        let Some(manifest) = manifest else {
            debug!(agent_id = %agent_id, "No manifest, ignoring failure");
            return;
        };
        if !manifest.auto_restart {
            debug!(agent_id = %agent_id, "Auto-restart disabled, ignoring failure");
            return;
        }

        let attempts = self.attempts_in_window(agent_id).await;
        if attempts >= self.config.max_restart_attempts {
            warn!(agent_id = %agent_id, attempts, "Restart budget exhausted");
            self.handle_critical_failure(agent_id, &manifest, reason).await;
            return;
        }

        let delay = backoff_delay(self.config.base_backoff_ms, attempts);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        info!(
            agent_id = %agent_id,
            attempt = attempts + 1,
            delay_ms,
            "Scheduling restart"
        );
        self.events.publish(EventPayload::RestartScheduled {
            agent_id,
            attempt: attempts + 1,
            delay_ms,
        });

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own slot first so pending_restarts is accurate while
            // the restart itself runs.
            inner.timers.write().await.remove(&agent_id);
            inner.restart(agent_id).await;
        });

        // A newer failure replaces any restart already pending for the agent.
        let mut timers = self.timers.write().await;
        if let Some(old) = timers.insert(agent_id, handle) {
            old.abort();
        }
    }

    /// Perform one restart attempt: record it, stop the old process
    /// (failures tolerated), start a replacement.
    async fn restart(&self, agent_id: Uuid) {
        let manifest = {
            let manifests = self.manifests.read().await;
            manifests.get(&agent_id).cloned()
        };
        let Some(manifest) = manifest else {
            return;
        };

        let attempt = {
            let mut history = self.history.write().await;
            let attempts = history.entry(agent_id).or_default();
            attempts.push(Utc::now());
            u32::try_from(attempts.len()).unwrap_or(u32::MAX)
        };

        if let Err(e) = self.lifecycle.stop(agent_id).await {
            // A crashed process often cannot be stopped cleanly.
            warn!(agent_id = %agent_id, error = %e, "Stop before restart failed");
        }

        let manifest_payload = json!({
            "name": manifest.name,
            "capability": manifest.capability,
            "criticality": manifest.criticality,
        });
        match self
            .lifecycle
            .start(&manifest.capability, manifest_payload)
            .await
        {
            Ok(replacement_id) => {
                info!(agent_id = %agent_id, replacement_id = %replacement_id, "Agent restarted");
                self.history.write().await.remove(&agent_id);
                self.events.publish(EventPayload::RestartSucceeded {
                    agent_id,
                    replacement_id,
                });
            }
            Err(e) => {
                error!(agent_id = %agent_id, attempt, error = %e, "Restart failed");
                self.events.publish(EventPayload::RestartFailed {
                    agent_id,
                    attempt,
                    error: e.to_string(),
                });
                let _ = self.failures.send((agent_id, e.to_string()));
            }
        }
    }

    /// Escalation path once the restart budget is spent.
    async fn handle_critical_failure(
        self: &Arc<Self>,
        agent_id: Uuid,
        manifest: &AgentManifest,
        reason: &str,
    ) {
        if let Err(e) = self
            .alerts
            .alert(
                &format!("agent {} ({}) unrecoverable", manifest.name, agent_id),
                reason,
            )
            .await
        {
            error!(agent_id = %agent_id, error = %e, "Alert delivery failed");
        }
        self.events.publish(EventPayload::EscalationRaised {
            agent_id,
            reason: reason.to_string(),
        });

        if manifest.criticality == Criticality::Critical {
            // No substitution for critical agents; the operator decides.
            self.events.publish(EventPayload::FeatureDegraded {
                capability: manifest.capability.clone(),
            });
            return;
        }

        match self.discovery.find_substitute(&manifest.capability).await {
            Ok(Some(substitute)) => {
                info!(
                    agent_id = %agent_id,
                    substitute_id = %substitute.id,
                    capability = %manifest.capability,
                    "Substitute agent found"
                );
                self.events.publish(EventPayload::SubstituteFound {
                    agent_id,
                    substitute_id: substitute.id,
                    capability: manifest.capability.clone(),
                });
            }
            Ok(None) => {
                warn!(capability = %manifest.capability, "No substitute, degrading feature");
                self.events.publish(EventPayload::FeatureDegraded {
                    capability: manifest.capability.clone(),
                });
            }
            Err(e) => {
                error!(capability = %manifest.capability, error = %e, "Discovery failed");
                self.events.publish(EventPayload::FeatureDegraded {
                    capability: manifest.capability.clone(),
                });
            }
        }
    }
}

/// `base × 2^attempts`, saturating.
fn backoff_delay(base_ms: u64, attempts: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempts)))
}

/// Self-healing service.
pub struct SelfHealingManager {
    inner: Arc<HealingInner>,
    /// Drains the failure channel; re-enters `handle_failure` for restarts
    /// that failed.
    failure_worker: JoinHandle<()>,
}

impl SelfHealingManager {
    pub fn new(
        config: HealingConfig,
        lifecycle: Arc<dyn AgentLifecycle>,
        discovery: Arc<dyn Discovery>,
        alerts: Arc<dyn AlertSink>,
        events: Arc<EventBus>,
    ) -> Self {
        let (failures, mut failure_rx) = mpsc::unbounded_channel::<(Uuid, String)>();
        let inner = Arc::new(HealingInner {
            manifests: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
            failures,
            lifecycle,
            discovery,
            alerts,
            events,
            config,
        });

        // The inner holds the sender, so this loop only ends when shutdown
        // aborts it.
        let worker_inner = Arc::clone(&inner);
        let failure_worker = tokio::spawn(async move {
            while let Some((agent_id, reason)) = failure_rx.recv().await {
                worker_inner.handle_failure(agent_id, &reason).await;
            }
        });

        Self {
            inner,
            failure_worker,
        }
    }

    /// Register (or replace) the healing policy for an agent.
    pub async fn register_manifest(&self, agent_id: Uuid, manifest: AgentManifest) {
        self.inner.manifests.write().await.insert(agent_id, manifest);
    }

    pub async fn remove_manifest(&self, agent_id: Uuid) {
        self.inner.manifests.write().await.remove(&agent_id);
        self.inner.history.write().await.remove(&agent_id);
        if let Some(timer) = self.inner.timers.write().await.remove(&agent_id) {
            timer.abort();
        }
    }

    /// Backoff before the next attempt given how many were already made.
    pub fn calculate_backoff(&self, attempts: u32) -> Duration {
        backoff_delay(self.inner.config.base_backoff_ms, attempts)
    }

    /// Entry point: an agent failed.
    pub async fn handle_failure(&self, agent_id: Uuid, reason: &str) {
        self.inner.handle_failure(agent_id, reason).await;
    }

    /// Restart attempt timestamps recorded for an agent.
    pub async fn restart_history(&self, agent_id: Uuid) -> Vec<DateTime<Utc>> {
        self.inner
            .history
            .read()
            .await
            .get(&agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> HealingStats {
        let history = self.inner.history.read().await;
        HealingStats {
            manifests: self.inner.manifests.read().await.len(),
            agents_with_history: history.len(),
            pending_restarts: self.inner.timers.read().await.len(),
            total_recorded_attempts: history.values().map(Vec::len).sum(),
        }
    }

    /// Cancel every pending restart timer and stop the failure worker.
    pub async fn shutdown(&self) {
        self.failure_worker.abort();
        let mut timers = self.inner.timers.write().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
