//! Change record data structures

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Classification of a settled, non-suppressed filesystem event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Path had no known hash and now has content
    Add,
    /// Path content hash differs from the last observed one
    Change,
    /// Tracked path disappeared
    Unlink,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Change => "change",
            ChangeKind::Unlink => "unlink",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified change. Created once per settle and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    path: PathBuf,
    kind: ChangeKind,
    /// Timestamp (Unix milliseconds)
    timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

impl ChangeRecord {
    /// Record for a path seen for the first time
    pub fn added(path: PathBuf, hash: ContentHash, size: u64) -> Self {
        Self::with_content(path, ChangeKind::Add, hash, size)
    }

    /// Record for a tracked path whose content changed
    pub fn changed(path: PathBuf, hash: ContentHash, size: u64) -> Self {
        Self::with_content(path, ChangeKind::Change, hash, size)
    }

    /// Record for a tracked path that disappeared
    pub fn unlinked(path: PathBuf) -> Self {
        Self {
            path,
            kind: ChangeKind::Unlink,
            timestamp_ms: now_unix_ms(),
            hash: None,
            size: None,
        }
    }

    fn with_content(path: PathBuf, kind: ChangeKind, hash: ContentHash, size: u64) -> Self {
        Self {
            path,
            kind,
            timestamp_ms: now_unix_ms(),
            hash: Some(hash),
            size: Some(size),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn hash(&self) -> Option<ContentHash> {
        self.hash
    }

    /// Byte size of the content (absent for unlink)
    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
