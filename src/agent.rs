//! Agent types: identity, lifecycle, and the registered record.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{TaskDescriptor, TaskId};
use crate::locks::ResourceId;

/// Unique identifier for an agent. Caller-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Mint a fresh ID using UUID v7 (time-ordered) for callers that do not
    /// assign their own.
    pub fn generate() -> Self {
        Self(format!("agent-{}", Uuid::now_v7()))
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    /// Admitted, not yet doing work.
    Starting,
    /// Actively executing its task.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl AgentLifecycle {
    /// Check if the agent has finished, either way.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentLifecycle::Completed | AgentLifecycle::Failed)
    }

    /// Check if the lifecycle can move to the given state.
    pub fn can_transition_to(&self, to: AgentLifecycle) -> bool {
        use AgentLifecycle::*;
        match (self, to) {
            (Starting, Running) => true,
            (Running, Completed | Failed) => true,
            // Abandoning before any work started is allowed
            (Starting, Failed) => true,
            (Completed | Failed, _) => false,
            (from, to) if *from == to => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentLifecycle::Starting => "starting",
            AgentLifecycle::Running => "running",
            AgentLifecycle::Completed => "completed",
            AgentLifecycle::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A registered agent.
///
/// Owned by the registry and mutated only through coordinator operations.
/// `locked_resources` is a view over the lock table entries held by this
/// agent; the coordinator keeps the two in step on every acquire and release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent identifier.
    pub id: AgentId,
    /// Agent mode (backend, console, meta, ...).
    pub mode: String,
    /// Task the agent is running, named by the task file.
    pub current_task: TaskId,
    /// Source path of the task.
    pub task_path: PathBuf,
    /// Lifecycle state.
    pub lifecycle: AgentLifecycle,
    /// When the agent was admitted.
    pub started_at: DateTime<Utc>,
    /// Admission time plus the task's estimated duration.
    pub estimated_completion: DateTime<Utc>,
    /// Resources this agent currently holds locks on.
    pub locked_resources: Vec<ResourceId>,
    /// Whether the task declared itself parallel-compatible.
    pub parallel_compatible: bool,
    /// Last heartbeat time.
    pub heartbeat: DateTime<Utc>,
}

impl AgentRecord {
    /// Build the record for a freshly admitted agent.
    pub fn new(
        id: AgentId,
        mode: impl Into<String>,
        task_path: &Path,
        descriptor: &TaskDescriptor,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            mode: mode.into(),
            current_task: TaskId::from_path(task_path),
            task_path: task_path.to_path_buf(),
            lifecycle: AgentLifecycle::Starting,
            started_at: now,
            estimated_completion: now + descriptor.estimated_duration(),
            locked_resources: Vec::new(),
            parallel_compatible: descriptor.parallel_compatible,
            heartbeat: now,
        }
    }
}
