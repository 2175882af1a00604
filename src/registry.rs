//! Agent registry: who is running what, and when they last checked in.
//!
//! Plain data like the lock table; the coordinator's state mutex provides
//! exterior mutual exclusion. Unregistering never touches locks: releasing
//! them first is the coordinator's job, so a failed unregister cannot orphan
//! lock entries.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::agent::{AgentId, AgentLifecycle, AgentRecord};
use crate::locks::ResourceId;

/// Map from agent ID to its registered record.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, AgentRecord>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from persisted records.
    pub fn from_records(records: Vec<AgentRecord>) -> Self {
        Self {
            agents: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Register an agent. Fails with `false` if the ID is already present.
    pub fn register(&mut self, record: AgentRecord) -> bool {
        if self.agents.contains_key(&record.id) {
            return false;
        }
        log::info!("registered agent {} on task {}", record.id, record.current_task);
        self.agents.insert(record.id.clone(), record);
        true
    }

    /// Remove an agent. Fails with `false` if absent.
    pub fn unregister(&mut self, id: &AgentId) -> bool {
        if self.agents.remove(id).is_some() {
            log::info!("unregistered agent {}", id);
            true
        } else {
            false
        }
    }

    /// Move an agent's lifecycle forward, refreshing its heartbeat.
    ///
    /// Returns `false` if the agent is absent or the transition is invalid.
    pub fn update_status(&mut self, id: &AgentId, to: AgentLifecycle, now: DateTime<Utc>) -> bool {
        let Some(record) = self.agents.get_mut(id) else {
            return false;
        };
        if !record.lifecycle.can_transition_to(to) {
            log::warn!(
                "rejected lifecycle transition {} -> {} for agent {}",
                record.lifecycle,
                to,
                id
            );
            return false;
        }
        record.lifecycle = to;
        record.heartbeat = now;
        true
    }

    /// Refresh an agent's heartbeat. Returns `false` if absent.
    pub fn touch_heartbeat(&mut self, id: &AgentId, now: DateTime<Utc>) -> bool {
        match self.agents.get_mut(id) {
            Some(record) => {
                record.heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Agents whose heartbeat is older than `ttl`, presumed dead.
    pub fn list_stale(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|r| now - r.heartbeat > ttl)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Record that `agent` now holds a lock on `resource`.
    pub fn add_lock(&mut self, id: &AgentId, resource: ResourceId) {
        if let Some(record) = self.agents.get_mut(id) {
            if !record.locked_resources.contains(&resource) {
                record.locked_resources.push(resource);
            }
        }
    }

    /// Drop `resource` from `agent`'s lock-set view.
    pub fn remove_lock(&mut self, id: &AgentId, resource: &ResourceId) {
        if let Some(record) = self.agents.get_mut(id) {
            record.locked_resources.retain(|r| r != resource);
        }
    }

    /// Look up an agent.
    pub fn get(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    /// Whether an agent is registered.
    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Iterate over all registered agents.
    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// All records, for persistence and reporting.
    pub fn snapshot(&self) -> Vec<AgentRecord> {
        self.agents.values().cloned().collect()
    }
}
