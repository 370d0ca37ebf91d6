//! End-to-end tests against the real filesystem

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;
use warden_core::hash_bytes;
use warden_journal::{BackupArchiver, MemoryEntry, MemorySink, Priority};
use warden_watcher::{ChangeEngine, ChangeKind, ChangeRecord, WatchConfig, WatchError, WatchEvent};

const DEBOUNCE_MS: u64 = 100;
const EVENT_WAIT: Duration = Duration::from_secs(5);
const QUIET_WAIT: Duration = Duration::from_millis(DEBOUNCE_MS * 4);

struct Fixture {
    _root_dir: TempDir,
    _backup_dir: TempDir,
    root: PathBuf,
    backups: PathBuf,
}

impl Fixture {
    fn new() -> Result<Self> {
        let root_dir = TempDir::new()?;
        let backup_dir = TempDir::new()?;
        let root = fs::canonicalize(root_dir.path())?;
        let backups = fs::canonicalize(backup_dir.path())?;
        Ok(Self {
            _root_dir: root_dir,
            _backup_dir: backup_dir,
            root,
            backups,
        })
    }

    fn config(&self) -> WatchConfig {
        let mut config = WatchConfig::with_roots([self.root.clone()]);
        config.debounce_ms = DEBOUNCE_MS;
        config.backup.dir = self.backups.clone();
        config
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

async fn next_change(rx: &mut broadcast::Receiver<WatchEvent>) -> ChangeRecord {
    loop {
        let event = timeout(EVENT_WAIT, rx.recv())
            .await
            .expect("timed out waiting for a change")
            .expect("event bus closed");
        if let WatchEvent::Changed(record) = event {
            return record;
        }
    }
}

async fn assert_quiet(rx: &mut broadcast::Receiver<WatchEvent>) {
    if let Ok(Ok(event)) = timeout(QUIET_WAIT, rx.recv()).await {
        panic!("expected no event, got {:?}", event);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_burst_of_writes_emits_one_change() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    let path = fixture.path("brief.md");
    for i in 0..5 {
        fs::write(&path, format!("draft {i}"))?;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let record = next_change(&mut rx).await;
    assert_eq!(record.path(), path.as_path());
    assert_eq!(record.kind(), ChangeKind::Add);
    assert_eq!(record.hash(), Some(hash_bytes(b"draft 4")));
    assert_quiet(&mut rx).await;

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_rewrite_is_suppressed() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    let path = fixture.path("notes.txt");
    fs::write(&path, b"same bytes")?;
    assert_eq!(next_change(&mut rx).await.kind(), ChangeKind::Add);

    fs::write(&path, b"same bytes")?;
    assert_quiet(&mut rx).await;

    fs::write(&path, b"new bytes")?;
    let record = next_change(&mut rx).await;
    assert_eq!(record.kind(), ChangeKind::Change);
    assert_eq!(engine.file_hash(&path), Some(hash_bytes(b"new bytes")));

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unlink_clears_tracking() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    let path = fixture.path("draft.md");
    fs::write(&path, b"temporary")?;
    next_change(&mut rx).await;
    assert!(engine.file_hash(&path).is_some());

    fs::remove_file(&path)?;
    let record = next_change(&mut rx).await;
    assert_eq!(record.kind(), ChangeKind::Unlink);
    assert_eq!(record.hash(), None);
    assert_eq!(engine.file_hash(&path), None);

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backups_are_pruned_to_limit() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut config = fixture.config();
    config.backup.max_backups = 3;

    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(config).await?;

    let path = fixture.path("contract.txt");
    for i in 0..5 {
        fs::write(&path, format!("revision {i}"))?;
        next_change(&mut rx).await;
    }

    let archiver = BackupArchiver::new(&fixture.backups, 3);
    let entries = archiver.entries("contract.txt").await?;
    assert_eq!(entries.len(), 3);
    assert_eq!(fs::read_to_string(&entries[2].path)?, "revision 4");
    assert_eq!(fs::read_to_string(&entries[0].path)?, "revision 2");

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backups_disabled() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut config = fixture.config();
    config.backup.enabled = false;

    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(config).await?;

    fs::write(fixture.path("a.txt"), b"a")?;
    next_change(&mut rx).await;

    assert_eq!(fs::read_dir(&fixture.backups)?.count(), 0);
    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignored_paths_never_surface() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut config = fixture.config();
    config.ignore.patterns.push("scratch/".to_string());

    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(config).await?;

    fs::create_dir(fixture.path("scratch"))?;
    fs::write(fixture.path("server.log"), b"noise")?;
    fs::write(fixture.path("scratch/tmp.txt"), b"noise")?;
    fs::write(fixture.path("kept.txt"), b"signal")?;

    let record = next_change(&mut rx).await;
    assert_eq!(record.path(), fixture.path("kept.txt").as_path());
    assert_quiet(&mut rx).await;

    // Rewrites and deletes of ignored files stay silent too
    fs::write(fixture.path("server.log"), b"more noise")?;
    fs::write(fixture.path("scratch/tmp.txt"), b"rewritten")?;
    fs::remove_file(fixture.path("server.log"))?;
    fs::remove_file(fixture.path("scratch/tmp.txt"))?;
    assert_quiet(&mut rx).await;

    assert_eq!(engine.file_hash(fixture.path("server.log")), None);
    assert_eq!(engine.file_hash(fixture.path("scratch/tmp.txt")), None);
    assert_eq!(engine.tracked_files(), 1);

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_history_limit_returns_most_recent() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    for name in ["one.txt", "two.txt", "three.txt"] {
        fs::write(fixture.path(name), name)?;
        next_change(&mut rx).await;
    }

    assert_eq!(engine.change_history(None).len(), 3);
    let recent = engine.change_history(Some(2));
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].path(), fixture.path("two.txt").as_path());
    assert_eq!(recent[1].path(), fixture.path("three.txt").as_path());
    assert!(engine.change_history(Some(0)).is_empty());

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_path_silences_root() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;
    assert_eq!(engine.watched_paths(), vec![fixture.root.clone()]);

    // Pending timer for this write is cancelled by the removal
    fs::write(fixture.path("pending.txt"), b"x")?;
    engine.remove_path(&fixture.root)?;
    fs::write(fixture.path("after.txt"), b"y")?;

    assert_quiet(&mut rx).await;
    assert!(engine.watched_paths().is_empty());
    assert!(engine.is_running());

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_path_while_running() -> Result<()> {
    let fixture = Fixture::new()?;
    let second = TempDir::new()?;
    let second_root = fs::canonicalize(second.path())?;

    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    engine.add_path(&second_root)?;
    engine.add_path(&second_root)?;
    assert_eq!(engine.watched_paths().len(), 2);

    let path = second_root.join("late.txt");
    fs::write(&path, b"late")?;
    assert_eq!(next_change(&mut rx).await.path(), path.as_path());

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_paths_each_emit() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    fs::write(fixture.path("left.txt"), b"left")?;
    fs::write(fixture.path("right.txt"), b"right")?;

    let mut seen = vec![next_change(&mut rx).await, next_change(&mut rx).await];
    seen.sort_by(|a, b| a.path().cmp(b.path()));
    assert_eq!(seen[0].path(), fixture.path("left.txt").as_path());
    assert_eq!(seen[0].hash(), Some(hash_bytes(b"left")));
    assert_eq!(seen[1].path(), fixture.path("right.txt").as_path());
    assert_eq!(seen[1].hash(), Some(hash_bytes(b"right")));

    assert_eq!(engine.file_hash(fixture.path("left.txt")), Some(hash_bytes(b"left")));
    assert_eq!(engine.file_hash(fixture.path("right.txt")), Some(hash_bytes(b"right")));

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_discards_pending_and_blocks_new_events() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    fs::write(fixture.path("pending.txt"), b"x")?;
    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(engine.pending_timers(), 0);

    fs::write(fixture.path("after.txt"), b"y")?;
    assert_quiet(&mut rx).await;

    // Stopping twice is harmless
    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_existing_reports_change_for_known_file() -> Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("existing.md");
    fs::write(&path, b"before start")?;

    let mut config = fixture.config();
    config.scan_existing = true;

    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(config).await?;

    timeout(EVENT_WAIT, async {
        while engine.file_hash(&path).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    fs::write(&path, b"after start")?;
    assert_eq!(next_change(&mut rx).await.kind(), ChangeKind::Change);

    engine.stop();
    Ok(())
}

#[derive(Default)]
struct CollectingSink {
    entries: Mutex<Vec<MemoryEntry>>,
}

#[async_trait]
impl MemorySink for CollectingSink {
    async fn save(&self, entry: MemoryEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl MemorySink for FailingSink {
    async fn save(&self, _entry: MemoryEntry) -> Result<()> {
        anyhow::bail!("store offline")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changes_forwarded_to_memory_sink() -> Result<()> {
    let fixture = Fixture::new()?;
    let sink = Arc::new(CollectingSink::default());
    let engine = ChangeEngine::builder().memory_sink(sink.clone()).build();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    let path = fixture.path("memo.txt");
    fs::write(&path, b"memo")?;
    next_change(&mut rx).await;
    fs::remove_file(&path)?;
    next_change(&mut rx).await;

    timeout(EVENT_WAIT, async {
        while sink.entries.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let entries = sink.entries.lock().clone();
    assert!(entries.iter().all(|e| e.category == "file_change" && e.channel == "filesystem"));
    assert!(entries.iter().any(|e| e.priority == Priority::High));
    assert!(entries[0].key.starts_with(&format!("file_change:{}:", path.display())));

    engine.stop();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_sink_does_not_block_events() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::builder().memory_sink(Arc::new(FailingSink)).build();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    fs::write(fixture.path("a.txt"), b"a")?;
    fs::write(fixture.path("a.txt"), b"b")?;
    next_change(&mut rx).await;
    assert_eq!(engine.change_history(None).len(), 1);

    engine.stop();
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_errors() -> Result<()> {
    let fixture = Fixture::new()?;
    let engine = ChangeEngine::new();

    assert!(matches!(engine.add_path(&fixture.root), Err(WatchError::NotRunning)));

    let mut missing = fixture.config();
    missing.roots = vec![fixture.root.join("does-not-exist")];
    assert!(matches!(engine.start(missing).await, Err(WatchError::RootNotFound(_))));

    let mut empty = fixture.config();
    empty.roots.clear();
    assert!(matches!(engine.start(empty).await, Err(WatchError::InvalidConfig(_))));

    assert!(!engine.is_running());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_directory_moved_out_unlinks_its_files() -> Result<()> {
    let fixture = Fixture::new()?;
    let outside = TempDir::new()?;
    let engine = ChangeEngine::new();
    let mut rx = engine.subscribe();
    engine.start(fixture.config()).await?;

    fs::create_dir(fixture.path("sub"))?;
    // Let the recursive watch pick up the new directory
    tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
    fs::write(fixture.path("sub/a.txt"), b"a")?;
    fs::write(fixture.path("sub/b.txt"), b"b")?;
    next_change(&mut rx).await;
    next_change(&mut rx).await;
    assert_eq!(engine.tracked_files(), 2);

    fs::rename(fixture.path("sub"), outside.path().join("sub"))?;

    let mut unlinked = vec![next_change(&mut rx).await, next_change(&mut rx).await];
    unlinked.sort_by(|a, b| a.path().cmp(b.path()));
    assert!(unlinked.iter().all(|r| r.kind() == ChangeKind::Unlink));
    assert_eq!(unlinked[0].path(), fixture.path("sub/a.txt").as_path());
    assert_eq!(unlinked[1].path(), fixture.path("sub/b.txt").as_path());

    assert_eq!(engine.file_hash(fixture.path("sub/a.txt")), None);
    assert_eq!(engine.tracked_files(), 0);
    assert_quiet(&mut rx).await;

    engine.stop();
    Ok(())
}
