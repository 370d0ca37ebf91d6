//! Content-based change classification
//!
//! On settle the file is read in full and hashed. The hash table is the
//! only tracking state: a path is tracked exactly while it has an entry.

use bytes::Bytes;
use dashmap::DashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::trace;
use warden_core::{hash_bytes, ContentHash};

/// Content larger than this is hashed on the blocking pool
const INLINE_HASH_LIMIT: usize = 256 * 1024;

/// Outcome of classifying one settled path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Untracked path now has content
    Added {
        hash: ContentHash,
        content: Bytes,
    },
    /// Tracked path's content hash changed
    Changed {
        previous: ContentHash,
        hash: ContentHash,
        content: Bytes,
    },
    /// Tracked path is gone
    Unlinked { previous: ContentHash },
    /// Same bytes as last time (metadata touch, save without edits)
    Unchanged,
    /// Nothing to classify
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path is a directory
    Directory,
    /// Not found, and it was never tracked
    Untracked,
}

/// Last-known content hash per path
#[derive(Default)]
pub struct Classifier {
    hashes: DashMap<PathBuf, ContentHash>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the current state of `path` and update tracking.
    ///
    /// Callers must serialize calls per path. Errors other than not-found
    /// leave tracking untouched.
    pub async fn classify(&self, path: &Path) -> io::Result<Classification> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => Bytes::from(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(match self.hashes.remove(path) {
                    Some((_, previous)) => Classification::Unlinked { previous },
                    None => Classification::Skipped(SkipReason::Untracked),
                });
            }
            Err(e) => {
                if is_dir(path).await {
                    return Ok(Classification::Skipped(SkipReason::Directory));
                }
                return Err(e);
            }
        };

        let hash = hash_content(&content).await?;
        let previous = self.hashes.insert(path.to_path_buf(), hash);

        Ok(match previous {
            None => Classification::Added { hash, content },
            Some(previous) if previous == hash => {
                trace!("No content change for {}", path.display());
                Classification::Unchanged
            }
            Some(previous) => Classification::Changed {
                previous,
                hash,
                content,
            },
        })
    }

    /// Last-known hash, `None` when untracked
    pub fn file_hash(&self, path: &Path) -> Option<ContentHash> {
        self.hashes.get(path).map(|h| *h)
    }

    /// Start tracking `path` without classifying it.
    ///
    /// Never overwrites an existing record; returns whether it inserted.
    pub fn seed(&self, path: PathBuf, hash: ContentHash) -> bool {
        let mut inserted = false;
        self.hashes.entry(path).or_insert_with(|| {
            inserted = true;
            hash
        });
        inserted
    }

    /// Tracked paths strictly beneath `dir`, sorted
    pub fn tracked_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self
            .hashes
            .iter()
            .filter(|entry| entry.key() != dir && entry.key().starts_with(dir))
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        paths
    }

    /// Number of tracked paths
    pub fn tracked(&self) -> usize {
        self.hashes.len()
    }
}

async fn hash_content(content: &Bytes) -> io::Result<ContentHash> {
    if content.len() <= INLINE_HASH_LIMIT {
        return Ok(hash_bytes(content));
    }
    let content = content.clone();
    tokio::task::spawn_blocking(move || hash_bytes(&content))
        .await
        .map_err(|e| io::Error::new(ErrorKind::Other, e))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
