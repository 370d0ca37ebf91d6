//! Persistent memory store collaborator
//!
//! Each change record is forwarded as a `MemoryEntry` on a best-effort
//! basis. The engine never waits on a sink and only logs its failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use warden_core::{ChangeKind, ChangeRecord};

/// Category attached to every forwarded change
pub const CHANGE_CATEGORY: &str = "file_change";

/// Channel attached to every forwarded change
pub const CHANGE_CHANNEL: &str = "filesystem";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Arguments of one `save(key, value, category, priority, channel)` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub category: String,
    pub priority: Priority,
    pub channel: String,
}

impl MemoryEntry {
    /// Build the entry forwarded for a change record.
    ///
    /// Keyed `file_change:<path>:<timestamp_ms>:<kind>`; one path yields at
    /// most one record of each kind per millisecond.
    pub fn from_record(record: &ChangeRecord) -> Self {
        let priority = match record.kind() {
            ChangeKind::Unlink => Priority::High,
            ChangeKind::Add | ChangeKind::Change => Priority::Normal,
        };

        Self {
            key: format!(
                "{}:{}:{}:{}",
                CHANGE_CATEGORY,
                record.path().display(),
                record.timestamp_ms(),
                record.kind()
            ),
            value: serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
            category: CHANGE_CATEGORY.to_string(),
            priority,
            channel: CHANGE_CHANNEL.to_string(),
        }
    }
}

/// External best-effort persistence for change records
#[async_trait]
pub trait MemorySink: Send + Sync {
    async fn save(&self, entry: MemoryEntry) -> Result<()>;
}

/// Memory store backed by an embedded sled database
pub struct SledMemoryStore {
    db: sled::Db,
}

impl SledMemoryStore {
    /// Open or create a store at the given directory
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path.join("memory.db"))
            .with_context(|| format!("Failed to open memory store at {}", path.display()))?;
        Ok(Self { db })
    }

    /// Look up a saved entry by key
    pub fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[async_trait]
impl MemorySink for SledMemoryStore {
    async fn save(&self, entry: MemoryEntry) -> Result<()> {
        let value = serde_json::to_vec(&entry)?;
        self.db.insert(entry.key.as_bytes(), value)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use warden_core::hash_bytes;

    #[test]
    fn test_entry_from_record() {
        let record = ChangeRecord::added(PathBuf::from("/w/a.txt"), hash_bytes(b"abc"), 3);
        let entry = MemoryEntry::from_record(&record);

        assert!(entry.key.starts_with("file_change:/w/a.txt:"));
        assert_eq!(entry.category, CHANGE_CATEGORY);
        assert_eq!(entry.channel, CHANGE_CHANNEL);
        assert_eq!(entry.priority, Priority::Normal);
        assert_eq!(entry.value["kind"], "add");
        assert_eq!(entry.value["size"], 3);
    }

    #[test]
    fn test_unlink_is_high_priority() {
        let record = ChangeRecord::unlinked(PathBuf::from("/w/a.txt"));
        assert_eq!(MemoryEntry::from_record(&record).priority, Priority::High);
    }

    #[tokio::test]
    async fn test_sled_store_roundtrip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = SledMemoryStore::open(temp_dir.path())?;
        assert!(store.is_empty());

        let record = ChangeRecord::changed(PathBuf::from("/w/b.txt"), hash_bytes(b"b"), 1);
        let entry = MemoryEntry::from_record(&record);
        store.save(entry.clone()).await?;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&entry.key)?, Some(entry));
        assert_eq!(store.scan_prefix("file_change:/w/b.txt")?.len(), 1);
        assert!(store.scan_prefix("file_change:/w/c.txt")?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_same_millisecond_records_keep_both() -> Result<()> {
        let unlink: ChangeRecord = serde_json::from_value(serde_json::json!({
            "path": "/w/a.txt",
            "kind": "unlink",
            "timestamp_ms": 1_700_000_000_000u64,
        }))?;
        let add: ChangeRecord = serde_json::from_value(serde_json::json!({
            "path": "/w/a.txt",
            "kind": "add",
            "timestamp_ms": 1_700_000_000_000u64,
            "hash": hash_bytes(b"a").to_hex(),
            "size": 1,
        }))?;

        let temp_dir = TempDir::new()?;
        let store = SledMemoryStore::open(temp_dir.path())?;
        store.save(MemoryEntry::from_record(&unlink)).await?;
        store.save(MemoryEntry::from_record(&add)).await?;

        assert_eq!(store.len(), 2);
        assert!(store.get("file_change:/w/a.txt:1700000000000:unlink")?.is_some());
        assert!(store.get("file_change:/w/a.txt:1700000000000:add")?.is_some());
        Ok(())
    }
}
