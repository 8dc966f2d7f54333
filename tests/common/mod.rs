//! Common test utilities for integration tests
//!
//! Shared mock port implementations and helpers used across the
//! integration test files.

use async_trait::async_trait;
use drover::services::event_bus::{CoordinationEvent, EventPayload};
use drover::{
    Agent, AgentLifecycle, AgentRunner, AlertSink, CoordinationError, CoordinationResult,
    Discovery, MessageChannel, Subtask, Task, TaskDecomposer,
};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Collect events from a subscription until the predicate matches or the
/// timeout elapses. Returns every event seen, matched one last.
#[allow(dead_code)]
pub async fn collect_until<F>(
    rx: &mut broadcast::Receiver<CoordinationEvent>,
    timeout_ms: u64,
    mut done: F,
) -> Vec<CoordinationEvent>
where
    F: FnMut(&EventPayload) -> bool,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    let mut seen = Vec::new();
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await {
            Ok(Ok(event)) => {
                let matched = done(&event.payload);
                seen.push(event);
                if matched {
                    break;
                }
            }
            Ok(Err(_)) => break,
            Err(_) => {}
        }
    }
    seen
}

/// Runner that always succeeds with a fixed payload.
#[allow(dead_code)]
pub struct OkRunner;

#[async_trait]
impl AgentRunner for OkRunner {
    async fn run(&self, task: &Task) -> CoordinationResult<Value> {
        Ok(json!({"task_id": task.id}))
    }
}

/// Runner that always fails.
#[allow(dead_code)]
pub struct FailingRunner;

#[async_trait]
impl AgentRunner for FailingRunner {
    async fn run(&self, _task: &Task) -> CoordinationResult<Value> {
        Err(CoordinationError::ExecutionFailed("runner exploded".into()))
    }
}

/// Message channel that records every request and fails the subtasks named
/// in `fail_subtasks`.
pub struct RecordingChannel {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail_subtasks: Vec<String>,
}

#[allow(dead_code)]
impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_subtasks: Vec::new(),
        }
    }

    pub fn failing(subtasks: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_subtasks: subtasks.iter().map(ToString::to_string).collect(),
        }
    }

    /// (action, subtask_id) pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send_request(
        &self,
        _agent_id: Uuid,
        action: &str,
        payload: Value,
    ) -> CoordinationResult<Value> {
        let subtask_id = payload["subtask_id"].as_str().unwrap_or("").to_string();
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), subtask_id.clone()));
        if action == "execute" && self.fail_subtasks.contains(&subtask_id) {
            return Err(CoordinationError::ExecutionFailed(format!(
                "{subtask_id} failed"
            )));
        }
        Ok(json!({"subtask_id": subtask_id}))
    }
}

/// Decomposer returning a fixed subtask list for any task.
#[allow(dead_code)]
pub struct FixedDecomposer(pub Vec<Subtask>);

#[async_trait]
impl TaskDecomposer for FixedDecomposer {
    async fn decompose(&self, _task: &Task) -> CoordinationResult<Vec<Subtask>> {
        Ok(self.0.clone())
    }
}

/// Lifecycle mock with scripted start outcomes.
#[allow(dead_code)]
pub struct MockLifecycle {
    pub start_succeeds: bool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[allow(dead_code)]
impl MockLifecycle {
    pub fn succeeding() -> Self {
        Self {
            start_succeeds: true,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            start_succeeds: false,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentLifecycle for MockLifecycle {
    async fn stop(&self, _agent_id: Uuid) -> CoordinationResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _capability: &str, _manifest: Value) -> CoordinationResult<Uuid> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.start_succeeds {
            Ok(Uuid::new_v4())
        } else {
            Err(CoordinationError::ExecutionFailed("start failed".into()))
        }
    }
}

/// Discovery mock returning a pre-seeded substitute, if any.
#[allow(dead_code)]
pub struct MockDiscovery {
    pub substitute: Option<Agent>,
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn find_substitute(&self, _capability: &str) -> CoordinationResult<Option<Agent>> {
        Ok(self.substitute.clone())
    }
}

/// Alert sink counting deliveries.
#[allow(dead_code)]
pub struct CountingAlerts {
    pub delivered: AtomicUsize,
}

#[allow(dead_code)]
impl CountingAlerts {
    pub fn new() -> Self {
        Self {
            delivered: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AlertSink for CountingAlerts {
    async fn alert(&self, _subject: &str, _detail: &str) -> CoordinationResult<()> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
