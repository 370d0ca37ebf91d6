//! Timestamped backup archive with per-file retention
//!
//! Every added or changed file gets a copy in the archive directory named
//! `<basename>.<ULID>.bak`. ULIDs come from a monotonic generator, so names
//! never collide and sort chronologically. After each write the entries
//! sharing that basename are pruned oldest-first down to `max_backups`.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use ulid::{Generator, Ulid};

const BACKUP_SUFFIX: &str = ".bak";

/// A persisted copy of a file at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Location of the copy inside the archive directory
    pub path: PathBuf,
    /// Basename of the original file
    pub basename: String,
    /// Creation id (millisecond timestamp + monotonic tiebreak)
    pub id: Ulid,
}

impl BackupEntry {
    /// Creation time (Unix milliseconds)
    pub fn created_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }

    /// Parse an archive file name back into its basename and id
    fn parse(path: PathBuf, file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(BACKUP_SUFFIX)?;
        let (basename, id) = stem.rsplit_once('.')?;
        if basename.is_empty() {
            return None;
        }
        let id = Ulid::from_string(id).ok()?;
        Some(Self {
            path,
            basename: basename.to_string(),
            id,
        })
    }
}

/// Writes backups and enforces the retention cap
pub struct BackupArchiver {
    dir: PathBuf,
    max_backups: usize,
    ids: Mutex<Generator>,
}

impl BackupArchiver {
    pub fn new(dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            dir: dir.into(),
            max_backups: max_backups.max(1),
            ids: Mutex::new(Generator::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Create the archive directory if missing
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create backup directory {}", self.dir.display()))
    }

    /// Archive `content` as the newest backup of `original`, then prune.
    ///
    /// Returns the path of the new backup.
    pub async fn archive(&self, original: &Path, content: &[u8]) -> Result<PathBuf> {
        let basename = original
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("No usable basename for {}", original.display()))?;

        let id = self.next_id();
        let target = self.dir.join(format!("{basename}.{id}{BACKUP_SUFFIX}"));
        let tmp = self.dir.join(format!(".{basename}.{id}.tmp"));

        // Write-then-rename so a listing never sees a partial copy
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write backup {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to finalize backup {}", target.display()))?;

        let pruned = self.prune(basename).await?;
        debug!(
            "Archived {} -> {} ({} pruned)",
            original.display(),
            target.display(),
            pruned
        );

        Ok(target)
    }

    /// Archived entries for `basename`, oldest first
    pub async fn entries(&self, basename: &str) -> Result<Vec<BackupEntry>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list backup directory {}", self.dir.display())
                })
            }
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let file_name = item.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(entry) = BackupEntry::parse(item.path(), name) {
                if entry.basename == basename {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// Delete the oldest entries for `basename` beyond the cap.
    ///
    /// Returns how many were removed.
    async fn prune(&self, basename: &str) -> Result<usize> {
        let entries = self.entries(basename).await?;
        let excess = entries.len().saturating_sub(self.max_backups);

        for entry in entries.iter().take(excess) {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {}
                // A concurrent prune for a same-named file got there first
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to prune backup {}", entry.path.display())
                    })
                }
            }
        }

        Ok(excess)
    }

    fn next_id(&self) -> Ulid {
        // Generator only fails when the random part overflows within one ms
        self.ids.lock().generate().unwrap_or_else(|_| Ulid::new())
    }
}
