//! Coordination state persistence.
//!
//! Two independent JSON documents under the data directory, `locks.json` and
//! `agents.json`, each carrying a schema version and last-updated timestamp.
//! Writes go to a temp file and rename into place, so a crash mid-write
//! leaves the previous document intact. The documents are written locks
//! first; a lock whose holder is missing from the agents document after a
//! partial failure is reclaimed by ordinary TTL expiry on the next sweep.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;

use crate::agent::AgentRecord;
use crate::error::{Error, Result};
use crate::locks::LockEntry;

const SCHEMA_VERSION: &str = "1.0";

/// Persisted lock table document.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocksDocument {
    /// Schema version for migration.
    pub schema_version: String,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
    /// TTL the table was running with.
    pub lock_timeout_minutes: i64,
    /// Human-facing description.
    pub description: String,
    /// The lock entries.
    pub locks: Vec<LockEntry>,
}

/// Persisted agent registry document.
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentsDocument {
    /// Schema version for migration.
    pub schema_version: String,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
    /// Whether coordination was enabled when written.
    pub coordination_enabled: bool,
    /// Human-facing description.
    pub description: String,
    /// The agent records.
    pub agents: Vec<AgentRecord>,
}

/// Reads and writes the two coordination state documents.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store rooted at the given directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensure the state directory exists.
    pub async fn ensure_dir(&self) -> Result<()> {
        if !self.path.exists() {
            fs::create_dir_all(&self.path)
                .await
                .map_err(|e| Error::Storage(format!("failed to create state directory: {}", e)))?;
        }
        Ok(())
    }

    fn locks_path(&self) -> PathBuf {
        self.path.join("locks.json")
    }

    fn agents_path(&self) -> PathBuf {
        self.path.join("agents.json")
    }

    /// Persist the lock table.
    pub async fn save_locks(
        &self,
        locks: &[LockEntry],
        lock_timeout_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let document = LocksDocument {
            schema_version: SCHEMA_VERSION.to_string(),
            last_updated: now,
            lock_timeout_minutes,
            description: "File locking state for parallel agent coordination".to_string(),
            locks: locks.to_vec(),
        };
        self.write_document(&self.locks_path(), &document).await
    }

    /// Persist the agent registry.
    pub async fn save_agents(
        &self,
        agents: &[AgentRecord],
        coordination_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let document = AgentsDocument {
            schema_version: SCHEMA_VERSION.to_string(),
            last_updated: now,
            coordination_enabled,
            description: "Active agents and their current work".to_string(),
            agents: agents.to_vec(),
        };
        self.write_document(&self.agents_path(), &document).await
    }

    /// Load the persisted lock entries. `None` means no document yet.
    pub async fn load_locks(&self) -> Result<Option<Vec<LockEntry>>> {
        let document: Option<LocksDocument> = self.read_document(&self.locks_path()).await?;
        Ok(document.map(|d| d.locks))
    }

    /// Load the persisted agent records. `None` means no document yet.
    pub async fn load_agents(&self) -> Result<Option<Vec<AgentRecord>>> {
        let document: Option<AgentsDocument> = self.read_document(&self.agents_path()).await?;
        Ok(document.map(|d| d.agents))
    }

    async fn write_document<T: Serialize>(&self, path: &Path, document: &T) -> Result<()> {
        self.ensure_dir().await?;
        let json = serde_json::to_string_pretty(document)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Storage(format!("failed to replace {}: {}", path.display(), e)))?;
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Storage(format!("failed to read {}: {}", path.display(), e)))?;
        let document = serde_json::from_str(&json).map_err(|e| {
            log::warn!("corrupt state document {}: {}", path.display(), e);
            Error::Storage(format!("corrupt state document {}: {}", path.display(), e))
        })?;
        Ok(Some(document))
    }

    /// The state directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::locks::{LockMode, LockTable, ResourceId};
    use chrono::Duration;
    use tempfile::TempDir;

    fn sample_locks(now: DateTime<Utc>) -> Vec<LockEntry> {
        let mut table = LockTable::new(Duration::minutes(60));
        table.try_acquire(ResourceId::file("x.txt"), &AgentId::from("a1"), LockMode::Write, "task", now);
        table.try_acquire(ResourceId::named("deploy"), &AgentId::from("a2"), LockMode::Write, "task", now);
        table.snapshot()
    }

    #[tokio::test]
    async fn test_save_and_load_locks() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("coordination"));
        let now = Utc::now();

        store.save_locks(&sample_locks(now), 60, now).await.unwrap();

        let loaded = store.load_locks().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_agents() {
        use crate::agent::AgentRecord;
        use crate::descriptor::TaskDescriptor;

        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("coordination"));
        let now = Utc::now();

        let record = AgentRecord::new(
            AgentId::from("a1"),
            "backend",
            std::path::Path::new("tasks/build.md"),
            &TaskDescriptor::new("backend", 2),
            now,
        );
        store.save_agents(&[record], true, now).await.unwrap();

        let loaded = store.load_agents().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, AgentId::from("a1"));
    }

    #[tokio::test]
    async fn test_load_absent_is_none() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("coordination"));

        assert!(store.load_locks().await.unwrap().is_none());
        assert!(store.load_agents().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().to_path_buf());
        std::fs::write(temp.path().join("locks.json"), "not json {").unwrap();

        let result = store.load_locks().await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_envelope_fields() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().to_path_buf());
        let now = Utc::now();

        store.save_locks(&[], 60, now).await.unwrap();

        let raw = std::fs::read_to_string(temp.path().join("locks.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["lock_timeout_minutes"], 60);
        assert!(value["last_updated"].is_string());
    }
}
