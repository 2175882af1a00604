//! Conflict evaluation: the pure admissibility predicate.
//!
//! `evaluate` inspects snapshots of the lock table and agent registry and
//! returns every blocking reason at once, so a rejected caller sees the
//! complete picture instead of the first obstacle. It never mutates state,
//! which lets the coordinator hold one mutex across check-then-act.

use chrono::{DateTime, Utc};

use crate::agent::AgentId;
use crate::descriptor::{TaskDescriptor, TaskId};
use crate::locks::{LockTable, ResourceId};
use crate::oracle::CompletionOracle;
use crate::registry::AgentRegistry;

/// A reason a task cannot start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// A file the task would modify is under a live lock.
    FileLocked {
        path: std::path::PathBuf,
        holder: AgentId,
    },
    /// A named resource the task needs is under a live lock.
    ResourceLocked { name: String, holder: AgentId },
    /// A declared dependency has not completed.
    DependencyIncomplete { task: TaskId },
    /// A task this one conflicts with is currently active.
    TaskConflict { task: TaskId },
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::FileLocked { path, holder } => {
                write!(f, "file locked: {} by {}", path.display(), holder)
            }
            Conflict::ResourceLocked { name, holder } => {
                write!(f, "resource locked: {} by {}", name, holder)
            }
            Conflict::DependencyIncomplete { task } => {
                write!(f, "dependency not complete: {}", task)
            }
            Conflict::TaskConflict { task } => {
                write!(f, "conflicting task active: {}", task)
            }
        }
    }
}

/// Collect every reason `descriptor` cannot be admitted right now.
///
/// Admissible iff the result is empty. All checks run; nothing
/// short-circuits.
pub fn evaluate(
    descriptor: &TaskDescriptor,
    locks: &LockTable,
    registry: &AgentRegistry,
    oracle: &dyn CompletionOracle,
    now: DateTime<Utc>,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for path in &descriptor.modifies_files {
        if let Some(holder) = locks.live_holder(&ResourceId::file(path), now) {
            conflicts.push(Conflict::FileLocked {
                path: path.clone(),
                holder: holder.clone(),
            });
        }
    }

    for name in &descriptor.locked_resources {
        if let Some(holder) = locks.live_holder(&ResourceId::named(name.clone()), now) {
            conflicts.push(Conflict::ResourceLocked {
                name: name.clone(),
                holder: holder.clone(),
            });
        }
    }

    for dependency in &descriptor.depends_on {
        if !oracle.is_complete(dependency) {
            conflicts.push(Conflict::DependencyIncomplete {
                task: dependency.clone(),
            });
        }
    }

    for record in registry.iter() {
        if descriptor.conflicts_with.contains(&record.current_task) {
            conflicts.push(Conflict::TaskConflict {
                task: record.current_task.clone(),
            });
        }
    }

    conflicts
}
