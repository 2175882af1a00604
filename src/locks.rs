//! Lock table: per-resource read/write locks with TTL expiry.
//!
//! The table itself is plain data; the coordinator provides mutual exclusion
//! by holding its single state mutex across every call, so an expiry check
//! and the acquisition that follows it are one atomic section.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Unique identifier for a lockable resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceId {
    /// A file path.
    File(PathBuf),
    /// A custom named resource.
    Named(String),
}

impl ResourceId {
    /// Create a resource ID for a file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    /// Create a named resource ID.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceId::File(path) => write!(f, "{}", path.display()),
            ResourceId::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared: may coexist with other reads.
    Read,
    /// Exclusive: at most one per resource, never alongside reads.
    Write,
}

/// A held lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    /// The resource being locked.
    pub resource: ResourceId,
    /// The agent holding the lock.
    pub holder: AgentId,
    /// Lock mode.
    pub mode: LockMode,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Acquisition time plus the table TTL; the lock is logically absent
    /// once this has passed, even before a sweep removes it.
    pub expires_at: DateTime<Utc>,
    /// Why the lock was taken.
    pub purpose: String,
}

impl LockEntry {
    /// Whether the lock still counts at the given instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Map from resource to the locks currently installed on it.
///
/// Invariant: per resource, at most one live `Write` entry exists, and never
/// alongside any live `Read` entry.
#[derive(Debug, Clone)]
pub struct LockTable {
    entries: HashMap<ResourceId, Vec<LockEntry>>,
    ttl: Duration,
}

impl LockTable {
    /// Create an empty table with the given lock TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Rebuild a table from persisted entries.
    pub fn from_entries(entries: Vec<LockEntry>, ttl: Duration) -> Self {
        let mut table = Self::new(ttl);
        for entry in entries {
            table
                .entries
                .entry(entry.resource.clone())
                .or_default()
                .push(entry);
        }
        table
    }

    /// Attempt to acquire a lock, fail-fast.
    ///
    /// Expired entries on the resource are dropped first (lazy expiry). A
    /// request by an agent that already holds the resource succeeds; a sole
    /// `Read` holder asking for `Write` is upgraded in place. Returns `false`
    /// with no side effects beyond lazy expiry when another agent's live lock
    /// conflicts.
    pub fn try_acquire(
        &mut self,
        resource: ResourceId,
        agent: &AgentId,
        mode: LockMode,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let acquired = self.try_acquire_inner(&resource, agent, mode, purpose, now);
        if !acquired {
            self.drop_if_empty(&resource);
        }
        acquired
    }

    fn try_acquire_inner(
        &mut self,
        resource: &ResourceId,
        agent: &AgentId,
        mode: LockMode,
        purpose: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let entries = self.entries.entry(resource.clone()).or_default();
        entries.retain(|e| {
            if e.is_live(now) {
                true
            } else {
                log::debug!("dropping expired lock on {} held by {}", e.resource, e.holder);
                false
            }
        });

        if let Some(held) = entries.iter().position(|e| e.holder == *agent) {
            match (entries[held].mode, mode) {
                // Write already covers read; re-acquiring either is a no-op.
                (LockMode::Write, _) | (LockMode::Read, LockMode::Read) => return true,
                (LockMode::Read, LockMode::Write) => {
                    if entries.len() > 1 {
                        return false;
                    }
                    // Sole reader: upgrade with a fresh TTL.
                    entries[held].mode = LockMode::Write;
                    entries[held].acquired_at = now;
                    entries[held].expires_at = now + self.ttl;
                    entries[held].purpose = purpose.to_string();
                    return true;
                }
            }
        }

        let conflict = match mode {
            LockMode::Write => !entries.is_empty(),
            LockMode::Read => entries.iter().any(|e| e.mode == LockMode::Write),
        };
        if conflict {
            return false;
        }

        log::debug!("{} acquires {:?} lock on {}", agent, mode, resource);
        entries.push(LockEntry {
            resource: resource.clone(),
            holder: agent.clone(),
            mode,
            acquired_at: now,
            expires_at: now + self.ttl,
            purpose: purpose.to_string(),
        });
        true
    }

    /// Release the lock on `resource` if held by `agent`.
    ///
    /// Absent or held by someone else is a no-op returning `false`.
    pub fn release(&mut self, resource: &ResourceId, agent: &AgentId) -> bool {
        let Some(entries) = self.entries.get_mut(resource) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.holder != *agent);
        let released = entries.len() < before;
        self.drop_if_empty(resource);
        if released {
            log::debug!("{} releases lock on {}", agent, resource);
        }
        released
    }

    /// Release every lock held by `agent`, returning the affected resources.
    pub fn release_all(&mut self, agent: &AgentId) -> Vec<ResourceId> {
        let mut released = Vec::new();
        for (resource, entries) in self.entries.iter_mut() {
            let before = entries.len();
            entries.retain(|e| e.holder != *agent);
            if entries.len() < before {
                released.push(resource.clone());
            }
        }
        self.entries.retain(|_, entries| !entries.is_empty());
        released
    }

    /// Remove every expired entry, returning the removed locks.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<LockEntry> {
        let mut removed = Vec::new();
        for entries in self.entries.values_mut() {
            entries.retain(|e| {
                if e.is_live(now) {
                    true
                } else {
                    removed.push(e.clone());
                    false
                }
            });
        }
        self.entries.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// The holder of a live lock on `resource`, if any.
    pub fn live_holder(&self, resource: &ResourceId, now: DateTime<Utc>) -> Option<&AgentId> {
        self.entries
            .get(resource)?
            .iter()
            .find(|e| e.is_live(now))
            .map(|e| &e.holder)
    }

    /// Whether any live lock exists on `resource`.
    pub fn is_locked(&self, resource: &ResourceId, now: DateTime<Utc>) -> bool {
        self.live_holder(resource, now).is_some()
    }

    /// Resources on which `agent` holds a lock (live or not yet swept).
    pub fn held_by(&self, agent: &AgentId) -> Vec<ResourceId> {
        self.entries
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.holder == *agent))
            .map(|(resource, _)| resource.clone())
            .collect()
    }

    /// Number of live locks at the given instant.
    pub fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .values()
            .flat_map(|entries| entries.iter())
            .filter(|e| e.is_live(now))
            .count()
    }

    /// All entries, for persistence and reporting.
    pub fn snapshot(&self) -> Vec<LockEntry> {
        self.entries.values().flat_map(|v| v.iter().cloned()).collect()
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn drop_if_empty(&mut self, resource: &ResourceId) {
        if self.entries.get(resource).is_some_and(|v| v.is_empty()) {
            self.entries.remove(resource);
        }
    }
}
