//! Per-path debouncing logic
//!
//! Coalesces bursts of raw signals for one path into a single settle once
//! the path has been quiet for the configured window.

use crate::normalize::RawKind;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// A path whose quiet window elapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub path: PathBuf,
    /// Raw signals coalesced into this settle
    pub signals: u32,
    /// Kind of the last raw signal seen
    pub last_kind: RawKind,
}

/// Live countdown for one path
struct PendingTimer {
    id: u64,
    signals: u32,
    last_kind: RawKind,
    handle: JoinHandle<()>,
}

/// Per-path timer table
///
/// At most one timer is live per path: `touch` aborts and replaces the
/// previous timer inside one map entry operation.
pub struct Debouncer {
    window: Duration,
    timers: Arc<DashMap<PathBuf, PendingTimer>>,
    next_id: AtomicU64,
    settle_tx: mpsc::UnboundedSender<Settled>,
}

impl Debouncer {
    /// Create a debouncer delivering settles to `settle_tx`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(window: Duration, settle_tx: mpsc::UnboundedSender<Settled>) -> Self {
        Self {
            window,
            timers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            settle_tx,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a raw signal for `path`, restarting its quiet window
    pub fn touch(&self, path: PathBuf, kind: RawKind) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        match self.timers.entry(path.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get();
                previous.handle.abort();
                let signals = previous.signals.saturating_add(1);
                trace!("Re-armed {} ({} signals)", path.display(), signals);
                occupied.insert(PendingTimer {
                    id,
                    signals,
                    last_kind: kind,
                    handle: self.arm(path, id),
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingTimer {
                    id,
                    signals: 1,
                    last_kind: kind,
                    handle: self.arm(path, id),
                });
            }
        }
    }

    fn arm(&self, path: PathBuf, id: u64) -> JoinHandle<()> {
        let timers = Arc::clone(&self.timers);
        let settle_tx = self.settle_tx.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            // Only the current timer may clear the slot; a replaced one
            // that slipped past its abort delivers nothing.
            if let Some((path, timer)) = timers.remove_if(&path, |_, t| t.id == id) {
                let _ = settle_tx.send(Settled {
                    path,
                    signals: timer.signals,
                    last_kind: timer.last_kind,
                });
            }
        })
    }

    /// Cancel timers for every path under `root`, returning how many
    pub fn cancel_under(&self, root: &Path) -> usize {
        let mut cancelled = 0;
        self.timers.retain(|path, timer| {
            if path.starts_with(root) {
                timer.handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Cancel every pending timer, returning how many
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            cancelled += 1;
            false
        });
        cancelled
    }

    /// Number of paths with a live timer
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.timers.contains_key(path)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
