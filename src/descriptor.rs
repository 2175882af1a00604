//! Task descriptors: the declared footprint a task presents at admission.
//!
//! How a descriptor is produced (parsing a task document, reading structured
//! config) is the embedder's concern; the coordinator only consumes the
//! already-structured form through the [`DescriptorSource`] seam.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Derive a task ID from the task's source path (its file name).
    ///
    /// Dependency and conflict declarations refer to tasks by this name.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self(name)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How safe a task is to run alongside others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParallelSafety {
    /// Safe to run with any other task.
    Safe,
    /// Safe only if the declared footprint is honored.
    Conditional,
    /// Must run alone.
    Unsafe,
}

impl Default for ParallelSafety {
    fn default() -> Self {
        Self::Conditional
    }
}

/// Declared footprint of a task, immutable once produced.
///
/// File sets are lexically normalized and deduplicated; [`TaskDescriptor::normalized`]
/// enforces that invariant and every source is expected to apply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Agent mode the task was authored for.
    pub mode: String,
    /// Priority (0=critical, 4=low).
    pub priority: u8,
    /// Parallel safety classification.
    pub parallel_safety: ParallelSafety,
    /// Estimated duration in minutes.
    pub estimated_duration_minutes: i64,
    /// Tasks that must not be active while this one runs (ordered, deduped).
    pub conflicts_with: Vec<TaskId>,
    /// Tasks that must be complete before this one starts (ordered, deduped).
    pub depends_on: Vec<TaskId>,
    /// Files the task will modify.
    pub modifies_files: Vec<PathBuf>,
    /// Files the task will read.
    pub reads_files: Vec<PathBuf>,
    /// Named resources the task must hold exclusively.
    pub locked_resources: Vec<String>,
    /// Whether the task may run alongside compatible tasks.
    pub parallel_compatible: bool,
}

impl TaskDescriptor {
    /// Create a descriptor with an empty footprint.
    pub fn new(mode: impl Into<String>, priority: u8) -> Self {
        Self {
            mode: mode.into(),
            priority,
            parallel_safety: ParallelSafety::default(),
            estimated_duration_minutes: 60,
            conflicts_with: Vec::new(),
            depends_on: Vec::new(),
            modifies_files: Vec::new(),
            reads_files: Vec::new(),
            locked_resources: Vec::new(),
            parallel_compatible: false,
        }
    }

    /// Estimated duration as a `chrono::Duration`.
    pub fn estimated_duration(&self) -> Duration {
        Duration::minutes(self.estimated_duration_minutes)
    }

    /// Apply the canonical-form invariant: lexically normalize every path and
    /// drop duplicates from all declared sets, preserving first-seen order.
    pub fn normalized(mut self) -> Self {
        self.modifies_files = normalize_paths(self.modifies_files);
        self.reads_files = normalize_paths(self.reads_files);
        dedup_preserving_order(&mut self.conflicts_with);
        dedup_preserving_order(&mut self.depends_on);
        dedup_preserving_order(&mut self.locked_resources);
        self
    }
}

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// preceding components where possible. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn normalize_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .map(|p| normalize_path(&p))
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

fn dedup_preserving_order<T: Clone + Eq + std::hash::Hash>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Supplies parsed descriptors to the coordinator.
///
/// `None` means the task's descriptor could not be obtained; the coordinator
/// turns that into a rejection, never a crash.
pub trait DescriptorSource: Send + Sync {
    /// Look up the descriptor for the task at `task_path`.
    fn descriptor(&self, task_path: &Path) -> Option<TaskDescriptor>;
}

/// In-memory descriptor source for tests and embedders that already hold
/// parsed descriptors.
#[derive(Default)]
pub struct StaticDescriptors {
    descriptors: std::collections::HashMap<PathBuf, TaskDescriptor>,
}

impl StaticDescriptors {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under a task path, normalizing its footprint.
    pub fn insert(&mut self, task_path: impl Into<PathBuf>, descriptor: TaskDescriptor) {
        self.descriptors
            .insert(task_path.into(), descriptor.normalized());
    }

    /// Builder-style [`StaticDescriptors::insert`].
    pub fn with(mut self, task_path: impl Into<PathBuf>, descriptor: TaskDescriptor) -> Self {
        self.insert(task_path, descriptor);
        self
    }
}

impl DescriptorSource for StaticDescriptors {
    fn descriptor(&self, task_path: &Path) -> Option<TaskDescriptor> {
        self.descriptors.get(task_path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_from_path() {
        let id = TaskId::from_path(Path::new("gol-bevy/tasks/setup-project.md"));
        assert_eq!(id.as_ref(), "setup-project.md");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("src/./core/../locks.rs")),
            PathBuf::from("src/locks.rs")
        );
        assert_eq!(normalize_path(Path::new("../up.txt")), PathBuf::from("../up.txt"));
    }

    #[test]
    fn test_normalized_dedups_file_sets() {
        let mut descriptor = TaskDescriptor::new("backend", 2);
        descriptor.modifies_files = vec![
            PathBuf::from("src/main.rs"),
            PathBuf::from("src/./main.rs"),
            PathBuf::from("src/lib.rs"),
        ];
        descriptor.depends_on = vec![TaskId::from("t1"), TaskId::from("t1"), TaskId::from("t2")];

        let descriptor = descriptor.normalized();
        assert_eq!(
            descriptor.modifies_files,
            vec![PathBuf::from("src/main.rs"), PathBuf::from("src/lib.rs")]
        );
        assert_eq!(descriptor.depends_on, vec![TaskId::from("t1"), TaskId::from("t2")]);
    }

    #[test]
    fn test_static_descriptors_lookup() {
        let source = StaticDescriptors::new().with("tasks/a.md", TaskDescriptor::new("backend", 2));

        assert!(source.descriptor(Path::new("tasks/a.md")).is_some());
        assert!(source.descriptor(Path::new("tasks/missing.md")).is_none());
    }
}
