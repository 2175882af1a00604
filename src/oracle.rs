//! Task-completion oracle.
//!
//! Dependency checks need an unambiguous answer to "is task T done?". The
//! trait keeps the completion signal out of the core; [`MarkerOracle`] is the
//! shipped answer: a task is complete iff its `.done` marker file exists, so
//! a never-created task can never be mistaken for a finished one.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::descriptor::TaskId;

/// Answers whether a dependency has completed.
pub trait CompletionOracle: Send + Sync {
    /// Whether `task` is complete.
    fn is_complete(&self, task: &TaskId) -> bool;
}

/// Marker-file oracle: task `t` is complete iff `<dir>/<t>.done` exists.
pub struct MarkerOracle {
    dir: PathBuf,
}

impl MarkerOracle {
    /// Create an oracle reading markers from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the marker for a task.
    pub fn marker_path(&self, task: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.done", task))
    }
}

impl CompletionOracle for MarkerOracle {
    fn is_complete(&self, task: &TaskId) -> bool {
        self.marker_path(task).exists()
    }
}

/// Fixed-set oracle for tests.
#[derive(Default)]
pub struct StaticOracle {
    complete: HashSet<TaskId>,
}

impl StaticOracle {
    /// Oracle that reports every task incomplete.
    pub fn new() -> Self {
        Self::default()
    }

    /// Oracle that reports exactly the given tasks complete.
    pub fn completing(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            complete: tasks.into_iter().collect(),
        }
    }

    /// Mark a task complete.
    pub fn mark_complete(&mut self, task: TaskId) {
        self.complete.insert(task);
    }
}

impl CompletionOracle for StaticOracle {
    fn is_complete(&self, task: &TaskId) -> bool {
        self.complete.contains(task)
    }
}
