//! Normalization of native notifications
//!
//! Backends disagree on how renames and atomic replaces are reported
//! (inotify pairs From/To, FSEvents reports `Name(Any)` for both sides).
//! Everything is flattened to add/change/unlink per path here; the
//! classifier then decides by content, so the raw kind is advisory.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use std::path::PathBuf;

/// Raw signal kind after normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Add,
    Change,
    Unlink,
}

/// A normalized raw signal for a single path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSignal {
    pub path: PathBuf,
    pub kind: RawKind,
}

/// Flatten a native event into per-path signals
pub fn normalize(event: Event) -> Vec<RawSignal> {
    let kind = match event.kind {
        EventKind::Access(_) => return Vec::new(),
        // Directories have no content of their own; files inside them
        // produce their own events.
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            return Vec::new()
        }
        EventKind::Create(_) => RawKind::Add,
        EventKind::Remove(_) => RawKind::Unlink,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return rename_pair(event.paths);
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawKind::Unlink,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawKind::Add,
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => RawKind::Change,
    };

    event
        .paths
        .into_iter()
        .map(|path| RawSignal { path, kind })
        .collect()
}

/// `[old, new]` becomes an unlink of the old path and an add of the new one
fn rename_pair(paths: Vec<PathBuf>) -> Vec<RawSignal> {
    let mut paths = paths.into_iter();
    let mut signals = Vec::with_capacity(2);
    if let Some(from) = paths.next() {
        signals.push(RawSignal {
            path: from,
            kind: RawKind::Unlink,
        });
    }
    if let Some(to) = paths.next() {
        signals.push(RawSignal {
            path: to,
            kind: RawKind::Add,
        });
    }
    signals
}
