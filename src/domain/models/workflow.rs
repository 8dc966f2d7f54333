//! Workflow domain models.
//!
//! A composite task decomposes into subtasks forming a directed acyclic
//! graph; the execution plan groups them into levels of mutually independent
//! subtasks eligible for concurrent dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{CoordinationError, CoordinationResult};

/// Capability-addressed undo action for a completed subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    /// Action identifier understood by the receiving agent.
    pub action: String,
    /// Arbitrary parameters for the undo.
    #[serde(default)]
    pub payload: Value,
}

impl CompensationAction {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A single node of a decomposed composite task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Identifier unique within the composite task.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Capability an executing agent must advertise.
    pub required_capability: String,
    /// Input data forwarded to the agent.
    #[serde(default)]
    pub payload: Value,
    /// Ids of subtasks that must complete before this one may start.
    #[serde(default)]
    pub dependencies: HashSet<String>,
    /// Optional undo executed during rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationAction>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, required_capability: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            required_capability: required_capability.into(),
            payload: Value::Null,
            dependencies: HashSet::new(),
            compensation: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_compensation(mut self, compensation: CompensationAction) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// Directed graph over subtask ids, edges from dependency to dependent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// dependency id -> dependent ids
    edges: HashMap<String, Vec<String>>,
    /// subtask id -> number of unmet dependencies
    in_degree: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the graph from a subtask list.
    ///
    /// Fails on duplicate subtask ids, references to unknown subtask ids,
    /// and cycles; a graph that cannot be planned is rejected before
    /// anything is dispatched.
    pub fn build(subtasks: &[Subtask]) -> CoordinationResult<Self> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(subtasks.len());
        for subtask in subtasks {
            if !ids.insert(subtask.id.as_str()) {
                return Err(CoordinationError::DuplicateSubtask(subtask.id.clone()));
            }
        }

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();

        for subtask in subtasks {
            in_degree.entry(subtask.id.clone()).or_insert(0);
            for dep in &subtask.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(CoordinationError::UnknownDependency {
                        subtask: subtask.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges
                    .entry(dep.clone())
                    .or_default()
                    .push(subtask.id.clone());
                *in_degree.entry(subtask.id.clone()).or_insert(0) += 1;
            }
        }

        let graph = Self { edges, in_degree };
        if let Some(cycle) = graph.find_cycle(subtasks) {
            return Err(CoordinationError::DependencyCycle(cycle));
        }
        Ok(graph)
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.in_degree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_degree.is_empty()
    }

    /// Dependents of the given subtask id.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.edges.get(id).map_or(&[], Vec::as_slice)
    }

    /// DFS cycle detection over the dependency relation, returning the
    /// offending path when one exists.
    fn find_cycle(&self, subtasks: &[Subtask]) -> Option<Vec<String>> {
        // dependent -> dependencies, the direction a cycle is reported in
        let deps: HashMap<&str, &HashSet<String>> = subtasks
            .iter()
            .map(|s| (s.id.as_str(), &s.dependencies))
            .collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        fn visit<'a>(
            node: &'a str,
            deps: &HashMap<&'a str, &'a HashSet<String>>,
            visited: &mut HashSet<&'a str>,
            stack: &mut HashSet<&'a str>,
            path: &mut Vec<&'a str>,
        ) -> bool {
            visited.insert(node);
            stack.insert(node);
            path.push(node);

            if let Some(node_deps) = deps.get(node) {
                for dep in node_deps.iter() {
                    if !visited.contains(dep.as_str()) {
                        if visit(dep, deps, visited, stack, path) {
                            return true;
                        }
                    } else if stack.contains(dep.as_str()) {
                        if let Some(start) = path.iter().position(|n| *n == dep.as_str()) {
                            path.drain(0..start);
                        }
                        path.push(dep);
                        return true;
                    }
                }
            }

            stack.remove(node);
            path.pop();
            false
        }

        for subtask in subtasks {
            if !visited.contains(subtask.id.as_str())
                && visit(
                    subtask.id.as_str(),
                    &deps,
                    &mut visited,
                    &mut stack,
                    &mut path,
                )
            {
                return Some(path.into_iter().map(String::from).collect());
            }
        }
        None
    }

    /// Compute the leveled execution plan.
    ///
    /// Level 0 holds subtasks with no predecessors; every other subtask sits
    /// at one plus the maximum level of its predecessors. Kahn's algorithm,
    /// processed tier by tier.
    pub fn execution_plan(&self) -> ExecutionPlan {
        let mut in_degree = self.in_degree.clone();
        let mut current: Vec<String> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| id.clone())
            .collect();
        current.sort();

        let mut levels: Vec<Vec<String>> = Vec::new();
        while !current.is_empty() {
            let mut next: Vec<String> = Vec::new();
            for id in &current {
                for dependent in self.dependents(id) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            next.sort();
            levels.push(std::mem::take(&mut current));
            current = next;
        }

        ExecutionPlan { levels }
    }
}

/// Ordered tiers of mutually independent subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub levels: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Total number of planned subtasks.
    pub fn total_subtasks(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Level index of the given subtask id, if planned.
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|s| s == id))
    }
}

/// Status of a coordinated (composite) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatedStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl CoordinatedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// Runtime state of one composite task being coordinated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatedTask {
    /// Id of the originating task.
    pub id: Uuid,
    /// Type of the originating task.
    pub task_type: String,
    /// Decomposed subtasks, in decomposer order.
    pub subtasks: Vec<Subtask>,
    /// The computed plan.
    pub plan: ExecutionPlan,
    /// Current status.
    pub status: CoordinatedStatus,
    /// Successful results by subtask id.
    pub results: HashMap<String, Value>,
    /// Failures by subtask id.
    pub errors: HashMap<String, String>,
    /// Subtask ids in the order their results were recorded; rollback
    /// compensates in reverse of this order.
    pub completion_order: Vec<String>,
    /// Index of the level currently executing.
    pub current_level: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CoordinatedTask {
    pub fn new(id: Uuid, task_type: String, subtasks: Vec<Subtask>, plan: ExecutionPlan) -> Self {
        Self {
            id,
            task_type,
            subtasks,
            plan,
            status: CoordinatedStatus::Pending,
            results: HashMap::new(),
            errors: HashMap::new(),
            completion_order: Vec::new(),
            current_level: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Look up a subtask by id.
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Record a successful subtask result.
    pub fn record_success(&mut self, subtask_id: &str, result: Value) {
        if !self.results.contains_key(subtask_id) {
            self.completion_order.push(subtask_id.to_string());
        }
        self.results.insert(subtask_id.to_string(), result);
    }

    /// Record a subtask failure.
    pub fn record_failure(&mut self, subtask_id: &str, error: impl Into<String>) {
        self.errors.insert(subtask_id.to_string(), error.into());
    }

    /// Move to a terminal status and stamp the finish time.
    pub fn finish(&mut self, status: CoordinatedStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
