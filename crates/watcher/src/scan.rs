//! Initial scan of a newly watched root
//!
//! Walks the root and records the hash of every file already present, so
//! the first edit to a pre-existing file reports CHANGE instead of ADD.
//! Nothing is emitted. Entries classified concurrently are never
//! overwritten.

use crate::classify::Classifier;
use crate::ignore::IgnoreRules;
use anyhow::Result;
use std::path::{Path, PathBuf};
use warden_core::ContentHash;
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Seed hashes for every non-ignored file under `root`.
///
/// Returns the number of paths newly tracked.
pub async fn seed_existing(
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    classifier: Arc<Classifier>,
) -> Result<usize> {
    let seeded = tokio::task::spawn_blocking(move || {
        let mut seeded = 0;

        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !ignore.should_ignore_entry(&root, e.path(), e.file_type().is_dir()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Initial scan skipped an entry: {}", e);
                    continue;
                }
            };

            // Only check files
            if !entry.file_type().is_file() {
                continue;
            }

            match warden_core::hash_file(entry.path()) {
                Ok(hash) => {
                    if seed_if_present(&classifier, entry.path(), hash) {
                        seeded += 1;
                    }
                }
                Err(e) => debug!("Initial scan could not hash {}: {}", entry.path().display(), e),
            }
        }

        info!("Initial scan of {} tracked {} files", root.display(), seeded);
        seeded
    })
    .await?;

    Ok(seeded)
}

/// Seed `path` unless it vanished after hashing.
///
/// A lane may have unlinked it meanwhile; seeding then would resurrect a
/// record for a file that no longer exists.
fn seed_if_present(classifier: &Classifier, path: &Path, hash: ContentHash) -> bool {
    if std::fs::symlink_metadata(path).is_err() {
        debug!("Initial scan skipped vanished {}", path.display());
        return false;
    }
    classifier.seed(path.to_path_buf(), hash)
}
