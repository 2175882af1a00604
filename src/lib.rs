//! Corral: lock arbitration and admission control for parallel agents.
//!
//! Corral decides whether an agent may start a task against a shared file
//! tree: it evaluates the task's declared footprint against a durable lock
//! table and agent registry, and on admission atomically registers the agent
//! and acquires its locks. Expired locks and stale agents are reclaimed by a
//! periodic sweep.

pub mod agent;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod locks;
pub mod oracle;
pub mod registry;
pub mod store;

pub use agent::{AgentId, AgentLifecycle, AgentRecord};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoordinationConfig;
pub use conflict::{evaluate, Conflict};
pub use coordinator::{Admission, Coordinator, ReclaimReport, StatusReport};
pub use descriptor::{DescriptorSource, ParallelSafety, StaticDescriptors, TaskDescriptor, TaskId};
pub use error::{Error, Result};
pub use locks::{LockEntry, LockMode, LockTable, ResourceId};
pub use oracle::{CompletionOracle, MarkerOracle, StaticOracle};
pub use registry::AgentRegistry;
pub use store::StateStore;
