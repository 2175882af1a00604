//! Coordinator: atomic task admission, release, and reclamation.
//!
//! All coordination state lives behind one `tokio::sync::Mutex`, so an
//! admission's evaluate/register/acquire sequence can never interleave with
//! another admission, a release, or a sweep. Lock acquisition is fail-fast;
//! callers decide whether to retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::agent::{AgentId, AgentLifecycle, AgentRecord};
use crate::clock::Clock;
use crate::config::CoordinationConfig;
use crate::conflict::{evaluate, Conflict};
use crate::descriptor::{DescriptorSource, TaskDescriptor};
use crate::error::Result;
use crate::locks::{LockEntry, LockMode, LockTable, ResourceId};
use crate::oracle::CompletionOracle;
use crate::registry::AgentRegistry;
use crate::store::StateStore;

const LOCK_PURPOSE: &str = "task_execution";

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The task may start; locks are held.
    Admitted,
    /// The task may not start; every blocking reason is listed.
    Rejected { reasons: Vec<String> },
}

impl Admission {
    /// Whether the task was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// What a reclamation pass removed.
#[derive(Debug, Clone, Default)]
pub struct ReclaimReport {
    /// Resources whose expired locks were swept.
    pub expired_locks: Vec<ResourceId>,
    /// Agents removed for missed heartbeats.
    pub stale_agents: Vec<AgentId>,
}

/// Point-in-time snapshot for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Number of registered agents.
    pub active_agents: usize,
    /// Number of live locks.
    pub active_locks: usize,
    /// All agent records.
    pub agents: Vec<AgentRecord>,
    /// All lock entries.
    pub locks: Vec<LockEntry>,
    /// Whether coordination is enabled.
    pub coordination_enabled: bool,
}

/// Combined coordination state guarded by the single mutex.
#[derive(Clone)]
struct CoordinationState {
    locks: LockTable,
    agents: AgentRegistry,
}

/// Arbitrates which agents may start which tasks.
///
/// Explicitly constructed and owned; there is no ambient singleton. Clone the
/// surrounding `Arc` to share it with a background sweeper.
pub struct Coordinator {
    config: CoordinationConfig,
    state: Mutex<CoordinationState>,
    store: StateStore,
    clock: Arc<dyn Clock>,
    oracle: Arc<dyn CompletionOracle>,
    descriptors: Arc<dyn DescriptorSource>,
}

impl Coordinator {
    /// Open a coordinator, rebuilding state from the data directory.
    ///
    /// An absent document means a first run and an empty table; a corrupt one
    /// is a storage error, surfaced instead of silently discarding whatever
    /// locks it held. Run [`Coordinator::reclaim`] after opening to drop
    /// state that expired while down.
    pub async fn open(
        config: CoordinationConfig,
        clock: Arc<dyn Clock>,
        oracle: Arc<dyn CompletionOracle>,
        descriptors: Arc<dyn DescriptorSource>,
    ) -> Result<Self> {
        let store = StateStore::new(config.data_dir.clone());

        let locks = match store.load_locks().await? {
            Some(entries) => LockTable::from_entries(entries, config.lock_ttl()),
            None => LockTable::new(config.lock_ttl()),
        };
        let agents = match store.load_agents().await? {
            Some(records) => AgentRegistry::from_records(records),
            None => AgentRegistry::new(),
        };

        Ok(Self {
            config,
            state: Mutex::new(CoordinationState { locks, agents }),
            store,
            clock,
            oracle,
            descriptors,
        })
    }

    /// Attempt to admit `agent_id` for the task at `task_path`.
    ///
    /// Evaluate, register, and acquire run as one critical section; any
    /// acquisition or persistence failure rolls the whole admission back, so
    /// the attempt is atomic as observed from outside.
    pub async fn admit(&self, agent_id: &AgentId, mode: &str, task_path: &Path) -> Result<Admission> {
        let Some(descriptor) = self.descriptors.descriptor(task_path) else {
            log::warn!("no descriptor for task {}", task_path.display());
            return Ok(Admission::Rejected {
                reasons: vec![format!("descriptor unavailable: {}", task_path.display())],
            });
        };

        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let conflicts = evaluate(&descriptor, &state.locks, &state.agents, self.oracle.as_ref(), now);
        if !conflicts.is_empty() {
            log::info!("rejected agent {} for {}: {} conflicts", agent_id, task_path.display(), conflicts.len());
            return Ok(Admission::Rejected {
                reasons: conflicts.iter().map(ToString::to_string).collect(),
            });
        }

        // Admission is transactional: restore this snapshot on any failure.
        let checkpoint = state.clone();

        let record = AgentRecord::new(agent_id.clone(), mode, task_path, &descriptor, now);
        if !state.agents.register(record) {
            return Ok(Admission::Rejected {
                reasons: vec![format!("agent already registered: {}", agent_id)],
            });
        }

        for (resource, lock_mode) in lock_requests(&descriptor) {
            if state
                .locks
                .try_acquire(resource.clone(), agent_id, lock_mode, LOCK_PURPOSE, now)
            {
                state.agents.add_lock(agent_id, resource);
                continue;
            }

            // The evaluator cleared this footprint, but a lock it does not
            // model (a read-set entry, or a held read blocking an upgrade)
            // still conflicts. Roll back and reject.
            let reason = blocked_reason(&state.locks, &resource, now);
            *state = checkpoint;
            log::info!("rolled back admission of {}: {}", agent_id, reason);
            return Ok(Admission::Rejected { reasons: vec![reason] });
        }

        if let Err(e) = self.persist(&state).await {
            *state = checkpoint;
            return Err(e);
        }

        log::info!("admitted agent {} for task {}", agent_id, task_path.display());
        Ok(Admission::Admitted)
    }

    /// Release every lock held by `agent_id` and unregister it.
    ///
    /// Idempotent: an unknown or already-released agent is a no-op returning
    /// `Ok(false)`.
    pub async fn release(&self, agent_id: &AgentId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.agents.contains(agent_id) {
            return Ok(false);
        }

        let checkpoint = state.clone();
        let released = state.locks.release_all(agent_id);
        state.agents.unregister(agent_id);

        if let Err(e) = self.persist(&state).await {
            *state = checkpoint;
            return Err(e);
        }

        log::info!("released agent {} ({} locks)", agent_id, released.len());
        Ok(true)
    }

    /// Sweep expired locks and remove stale agents along with their locks.
    pub async fn reclaim(&self) -> Result<ReclaimReport> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let checkpoint = state.clone();

        let swept = state.locks.sweep_expired(now);
        for entry in &swept {
            state.agents.remove_lock(&entry.holder, &entry.resource);
            log::warn!("reclaimed expired lock on {} held by {}", entry.resource, entry.holder);
        }

        let stale = state.agents.list_stale(self.config.stale_after(), now);
        for agent_id in &stale {
            log::warn!("reclaiming stale agent {}", agent_id);
            state.locks.release_all(agent_id);
            state.agents.unregister(agent_id);
        }

        if swept.is_empty() && stale.is_empty() {
            return Ok(ReclaimReport::default());
        }

        if let Err(e) = self.persist(&state).await {
            *state = checkpoint;
            return Err(e);
        }

        Ok(ReclaimReport {
            expired_locks: swept.into_iter().map(|e| e.resource).collect(),
            stale_agents: stale,
        })
    }

    /// Move an agent's lifecycle forward. `Ok(false)` if the agent is absent
    /// or the transition invalid.
    pub async fn update_status(&self, agent_id: &AgentId, to: AgentLifecycle) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let checkpoint = state.clone();

        if !state.agents.update_status(agent_id, to, now) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&state).await {
            *state = checkpoint;
            return Err(e);
        }
        Ok(true)
    }

    /// Refresh an agent's heartbeat. `Ok(false)` if the agent is absent.
    pub async fn touch_heartbeat(&self, agent_id: &AgentId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let checkpoint = state.clone();

        if !state.agents.touch_heartbeat(agent_id, now) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&state).await {
            *state = checkpoint;
            return Err(e);
        }
        Ok(true)
    }

    /// Snapshot the coordination state for reporting.
    ///
    /// Runs a reclamation pass first, so the report never shows agents or
    /// locks that are already past their deadline.
    pub async fn status(&self) -> Result<StatusReport> {
        self.reclaim().await?;

        let state = self.state.lock().await;
        let now = self.clock.now();
        Ok(StatusReport {
            active_agents: state.agents.len(),
            active_locks: state.locks.live_count(now),
            agents: state.agents.snapshot(),
            locks: state.locks.snapshot(),
            coordination_enabled: self.config.coordination_enabled,
        })
    }

    /// Filter `candidates` to tasks that could be admitted right now and
    /// declare themselves parallel-compatible.
    pub async fn compatible_tasks(&self, candidates: &[PathBuf]) -> Vec<PathBuf> {
        let state = self.state.lock().await;
        let now = self.clock.now();

        candidates
            .iter()
            .filter(|path| match self.descriptors.descriptor(path) {
                Some(descriptor) => {
                    descriptor.parallel_compatible
                        && evaluate(&descriptor, &state.locks, &state.agents, self.oracle.as_ref(), now)
                            .is_empty()
                }
                None => false,
            })
            .cloned()
            .collect()
    }

    /// Run the periodic reclamation sweep until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        log::info!("reclamation sweeper running every {:?}", self.config.sweep_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reclaim().await {
                        log::error!("reclamation sweep failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    log::info!("reclamation sweeper stopped");
                    break;
                }
            }
        }
    }

    /// The configuration this coordinator runs with.
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    async fn persist(&self, state: &CoordinationState) -> Result<()> {
        let now = self.clock.now();
        self.store
            .save_locks(&state.locks.snapshot(), self.config.lock_ttl_minutes, now)
            .await?;
        self.store
            .save_agents(&state.agents.snapshot(), self.config.coordination_enabled, now)
            .await?;
        Ok(())
    }
}

/// The locks an admission must hold: write on every modified file and named
/// resource, read on every file in the read set not already being written.
fn lock_requests(descriptor: &TaskDescriptor) -> Vec<(ResourceId, LockMode)> {
    let mut requests: Vec<(ResourceId, LockMode)> = Vec::new();
    for path in &descriptor.modifies_files {
        requests.push((ResourceId::file(path), LockMode::Write));
    }
    for name in &descriptor.locked_resources {
        requests.push((ResourceId::named(name.clone()), LockMode::Write));
    }
    for path in &descriptor.reads_files {
        let resource = ResourceId::file(path);
        if !requests.iter().any(|(r, _)| *r == resource) {
            requests.push((resource, LockMode::Read));
        }
    }
    requests
}

fn blocked_reason(locks: &LockTable, resource: &ResourceId, now: DateTime<Utc>) -> String {
    match (resource, locks.live_holder(resource, now)) {
        (ResourceId::File(path), Some(holder)) => Conflict::FileLocked {
            path: path.clone(),
            holder: holder.clone(),
        }
        .to_string(),
        (ResourceId::Named(name), Some(holder)) => Conflict::ResourceLocked {
            name: name.clone(),
            holder: holder.clone(),
        }
        .to_string(),
        (_, None) => format!("lock unavailable: {}", resource),
    }
}
