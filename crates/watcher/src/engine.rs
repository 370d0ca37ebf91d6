//! Change engine: lifecycle, dispatch and the per-path processing pipeline
//!
//! ```text
//! notify (per root) -> normalize -> ignore -> debounce -> lane(path)
//!     lane: classify -> archive -> history -> memory sink -> bus
//! ```
//!
//! Each root has its own native watcher so a failing root only affects
//! itself. Signals from all roots share one dispatch task; settles share
//! one submit task; processing runs in detached per-path lanes.

use crate::bus::{ErrorScope, EventBus, EventFilter, Subscription, WatchEvent};
use crate::classify::{Classification, Classifier, SkipReason};
use crate::config::WatchConfig;
use crate::debounce::{Debouncer, Settled};
use crate::error::{Result, WatchError};
use crate::ignore::IgnoreRules;
use crate::lane::{LaneProcessor, PathLanes};
use crate::normalize::{normalize, RawKind};
use crate::scan;
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use warden_core::{ChangeRecord, ContentHash};
use warden_journal::history::DEFAULT_HISTORY_LIMIT;
use warden_journal::{BackupArchiver, ChangeHistory, MemoryEntry, MemorySink};

/// Native notification tagged with the root whose watcher produced it
struct RootSignal {
    root: PathBuf,
    result: notify::Result<notify::Event>,
}

/// Builder for [`ChangeEngine`]
pub struct EngineBuilder {
    history_limit: usize,
    event_capacity: usize,
    memory_sink: Option<Arc<dyn MemorySink>>,
}

impl EngineBuilder {
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Forward every change record to `sink` (best effort)
    pub fn memory_sink(mut self, sink: Arc<dyn MemorySink>) -> Self {
        self.memory_sink = Some(sink);
        self
    }

    pub fn build(self) -> ChangeEngine {
        ChangeEngine {
            classifier: Arc::new(Classifier::new()),
            history: Arc::new(ChangeHistory::new(self.history_limit)),
            bus: EventBus::new(self.event_capacity),
            memory_sink: self.memory_sink,
            state: Mutex::new(None),
        }
    }
}

/// State that exists only between `start` and `stop`
struct Running {
    config: WatchConfig,
    ignore: Arc<IgnoreRules>,
    debouncer: Arc<Debouncer>,
    watchers: HashMap<PathBuf, RecommendedWatcher>,
    active_roots: Arc<RwLock<HashSet<PathBuf>>>,
    signal_tx: mpsc::UnboundedSender<RootSignal>,
    tasks: Vec<JoinHandle<()>>,
}

/// Filesystem change-detection engine
///
/// Owns the hash table, change history and event bus. Tracking state and
/// history survive `stop`/`start` cycles.
pub struct ChangeEngine {
    classifier: Arc<Classifier>,
    history: Arc<ChangeHistory>,
    bus: EventBus,
    memory_sink: Option<Arc<dyn MemorySink>>,
    state: Mutex<Option<Running>>,
}

impl Default for ChangeEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ChangeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            history_limit: DEFAULT_HISTORY_LIMIT,
            event_capacity: 1024,
            memory_sink: None,
        }
    }

    /// Builder sized from a config's history and bus settings
    pub fn builder_for(config: &WatchConfig) -> EngineBuilder {
        Self::builder()
            .history_limit(config.history_limit)
            .event_capacity(config.event_capacity)
    }

    /// Begin observing every configured root.
    ///
    /// Validates `config`, ensures the backup directory exists and installs
    /// one native watch per root. Calling it again while running only adds
    /// roots that are not yet watched. Must be called within a tokio runtime.
    pub async fn start(&self, config: WatchConfig) -> Result<()> {
        config.validate()?;
        let roots = config
            .roots
            .iter()
            .map(|root| resolve_root(root))
            .collect::<Result<Vec<_>>>()?;

        if self.is_running() {
            return self.add_roots(&roots);
        }

        let archiver = if config.backup.enabled {
            let archiver = BackupArchiver::new(config.resolved_backup_dir()?, config.backup.max_backups);
            archiver.ensure_dir().await.map_err(WatchError::Backup)?;
            Some(Arc::new(archiver))
        } else {
            None
        };

        let mut ignore = IgnoreRules::new(config.ignore.clone())?;
        if let Some(archiver) = &archiver {
            let dir = std::fs::canonicalize(archiver.dir()).unwrap_or_else(|_| archiver.dir().to_path_buf());
            ignore = ignore.exclude_dir(dir);
        }
        let ignore = Arc::new(ignore);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let debouncer = Arc::new(Debouncer::new(config.debounce(), settle_tx.clone()));
        let active_roots = Arc::new(RwLock::new(HashSet::new()));

        let pipeline = Arc::new(Pipeline {
            classifier: Arc::clone(&self.classifier),
            archiver,
            history: Arc::clone(&self.history),
            bus: self.bus.clone(),
            memory_sink: self.memory_sink.clone(),
            resettle: settle_tx,
        });
        let lanes = PathLanes::new(pipeline);

        let tasks = vec![
            tokio::spawn(dispatch_signals(
                signal_rx,
                Arc::clone(&ignore),
                Arc::clone(&debouncer),
                Arc::clone(&active_roots),
                self.bus.clone(),
            )),
            tokio::spawn(submit_settles(settle_rx, lanes)),
        ];

        {
            let mut state = self.state.lock();
            if state.is_some() {
                // Lost a race with a concurrent start
                drop(state);
                for task in tasks {
                    task.abort();
                }
                return self.add_roots(&roots);
            }

            info!(
                "Starting change engine ({} roots, {}ms debounce)",
                roots.len(),
                config.debounce_ms
            );
            *state = Some(Running {
                config,
                ignore,
                debouncer,
                watchers: HashMap::new(),
                active_roots,
                signal_tx,
                tasks,
            });
        }

        self.add_roots(&roots)
    }

    /// Begin observing another root; already-watched roots are a no-op
    pub fn add_path(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = resolve_root(root.as_ref())?;
        self.add_roots(&[root])
    }

    fn add_roots(&self, roots: &[PathBuf]) -> Result<()> {
        let mut state = self.state.lock();
        let running = state.as_mut().ok_or(WatchError::NotRunning)?;

        for root in roots {
            if running.watchers.contains_key(root) {
                debug!("Already watching {}", root.display());
                continue;
            }

            running.ignore.add_root(root);
            match watch_root(root, running.signal_tx.clone()) {
                Ok(watcher) => {
                    running.watchers.insert(root.clone(), watcher);
                    running.active_roots.write().insert(root.clone());
                    info!("Watching {}", root.display());

                    if running.config.scan_existing {
                        tokio::spawn(seed_root(
                            root.clone(),
                            Arc::clone(&running.ignore),
                            Arc::clone(&self.classifier),
                        ));
                    }
                }
                Err(e) => {
                    // Other roots keep running
                    running.ignore.remove_root(root);
                    warn!("{}", e);
                    self.bus.error(ErrorScope::Root(root.clone()), e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Stop observing `root`.
    ///
    /// Pending timers under it are cancelled and queued signals from it are
    /// dropped. Work already handed to a lane finishes and may still emit.
    pub fn remove_path(&self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

        let mut state = self.state.lock();
        let running = state.as_mut().ok_or(WatchError::NotRunning)?;

        running.active_roots.write().remove(&root);
        match running.watchers.remove(&root) {
            Some(watcher) => {
                drop(watcher);
                running.ignore.remove_root(&root);
                let cancelled = running.debouncer.cancel_under(&root);
                info!("Stopped watching {} ({} pending cancelled)", root.display(), cancelled);
            }
            None => debug!("Not watching {}", root.display()),
        }

        Ok(())
    }

    /// Tear down every native watch and discard all pending timers.
    ///
    /// In-flight processing is not awaited. Stopping a stopped engine is a
    /// no-op.
    pub fn stop(&self) {
        let Some(running) = self.state.lock().take() else {
            return;
        };

        let Running {
            watchers,
            debouncer,
            tasks,
            ..
        } = running;

        let roots = watchers.len();
        drop(watchers);
        let cancelled = debouncer.cancel_all();
        for task in tasks {
            task.abort();
        }

        info!("Stopped change engine ({} roots, {} pending cancelled)", roots, cancelled);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Currently watched roots, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        let mut roots: Vec<_> = state
            .as_ref()
            .map(|r| r.watchers.keys().cloned().collect())
            .unwrap_or_default();
        roots.sort();
        roots
    }

    /// Paths with a live debounce timer
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|r| r.debouncer.pending())
            .unwrap_or(0)
    }

    /// Receiver for every change and error event
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.bus.subscribe()
    }

    /// Run `handler` for matching events until the subscription is dropped
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.bus.on(filter, handler)
    }

    /// Full history, or only the `limit` most recent records
    pub fn change_history(&self, limit: Option<usize>) -> Vec<ChangeRecord> {
        match limit {
            Some(limit) => self.history.recent(limit),
            None => self.history.all(),
        }
    }

    /// Last-known content hash, `None` when untracked
    pub fn file_hash(&self, path: impl AsRef<Path>) -> Option<ContentHash> {
        self.classifier.file_hash(path.as_ref())
    }

    /// Number of tracked paths
    pub fn tracked_files(&self) -> usize {
        self.classifier.tracked()
    }
}

impl Drop for ChangeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Canonical, existing directory for a configured root
fn resolve_root(root: &Path) -> Result<PathBuf> {
    let resolved = std::fs::canonicalize(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => WatchError::RootNotFound(root.to_path_buf()),
        _ => WatchError::Io(e),
    })?;
    if !resolved.is_dir() {
        return Err(WatchError::InvalidConfig(format!(
            "watched root is not a directory: {}",
            root.display()
        )));
    }
    Ok(resolved)
}

fn watch_root(root: &Path, signal_tx: mpsc::UnboundedSender<RootSignal>) -> Result<RecommendedWatcher> {
    let signal_root = root.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        let _ = signal_tx.send(RootSignal {
            root: signal_root.clone(),
            result,
        });
    })
    .map_err(|source| WatchError::Notify {
        root: root.to_path_buf(),
        source,
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|source| WatchError::Notify {
            root: root.to_path_buf(),
            source,
        })?;

    Ok(watcher)
}

/// Route native signals through the ignore filter into the debouncer
async fn dispatch_signals(
    mut signal_rx: mpsc::UnboundedReceiver<RootSignal>,
    ignore: Arc<IgnoreRules>,
    debouncer: Arc<Debouncer>,
    active_roots: Arc<RwLock<HashSet<PathBuf>>>,
    bus: EventBus,
) {
    while let Some(RootSignal { root, result }) = signal_rx.recv().await {
        if !active_roots.read().contains(&root) {
            trace!("Dropping signal from removed root {}", root.display());
            continue;
        }

        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!("Watch error for {}: {}", root.display(), e);
                bus.error(ErrorScope::Root(root), e.to_string());
                continue;
            }
        };

        for signal in normalize(event) {
            if ignore.should_ignore(&root, &signal.path) {
                trace!("Ignored {}", signal.path.display());
                continue;
            }
            debouncer.touch(signal.path, signal.kind);
        }
    }
}

async fn submit_settles(mut settle_rx: mpsc::UnboundedReceiver<Settled>, lanes: PathLanes<Settled, Pipeline>) {
    while let Some(settled) = settle_rx.recv().await {
        trace!(
            "Settled {} after {} signals (last {:?})",
            settled.path.display(),
            settled.signals,
            settled.last_kind
        );
        lanes.submit(settled.path.clone(), settled);
    }
}

async fn seed_root(root: PathBuf, ignore: Arc<IgnoreRules>, classifier: Arc<Classifier>) {
    if let Err(e) = scan::seed_existing(root.clone(), ignore, classifier).await {
        warn!("Initial scan of {} failed: {:#}", root.display(), e);
    }
}

/// classify -> archive -> history -> memory sink -> bus, for one settle
struct Pipeline {
    classifier: Arc<Classifier>,
    archiver: Option<Arc<BackupArchiver>>,
    history: Arc<ChangeHistory>,
    bus: EventBus,
    memory_sink: Option<Arc<dyn MemorySink>>,
    /// Feeds follow-up settles back into the lanes
    resettle: mpsc::UnboundedSender<Settled>,
}

#[async_trait]
impl LaneProcessor<Settled> for Pipeline {
    async fn process(&self, settled: Settled) {
        let path = settled.path;

        let outcome = match self.classifier.classify(&path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                self.bus.error(ErrorScope::Path(path), e.to_string());
                return;
            }
        };

        let (record, content) = match outcome {
            Classification::Added { hash, content } => {
                (ChangeRecord::added(path, hash, content.len() as u64), Some(content))
            }
            Classification::Changed { hash, content, .. } => {
                (ChangeRecord::changed(path, hash, content.len() as u64), Some(content))
            }
            Classification::Unlinked { .. } => (ChangeRecord::unlinked(path), None),
            Classification::Unchanged => {
                debug!("Suppressed no-op write to {}", path.display());
                return;
            }
            Classification::Skipped(SkipReason::Untracked) => {
                // A vanished directory is only reported by its own path
                self.unlink_beneath(&path);
                return;
            }
            Classification::Skipped(reason) => {
                trace!("Skipped {} ({:?})", path.display(), reason);
                return;
            }
        };

        if let (Some(archiver), Some(content)) = (&self.archiver, &content) {
            if let Err(e) = archiver.archive(record.path(), content).await {
                warn!("Backup of {} failed: {:#}", record.path().display(), e);
            }
        }

        match record.hash() {
            Some(hash) => info!("{} {} ({})", record.kind(), record.path().display(), hash.short()),
            None => info!("{} {}", record.kind(), record.path().display()),
        }

        self.history.record(record.clone());
        self.forward(&record);
        self.bus.change(record);
    }
}

impl Pipeline {
    /// Re-settle every tracked path under a vanished `dir` in its own lane
    fn unlink_beneath(&self, dir: &Path) {
        let orphans = self.classifier.tracked_under(dir);
        if orphans.is_empty() {
            trace!("Skipped {} (untracked)", dir.display());
            return;
        }

        debug!("{} vanished with {} tracked files", dir.display(), orphans.len());
        for path in orphans {
            let _ = self.resettle.send(Settled {
                path,
                signals: 1,
                last_kind: RawKind::Unlink,
            });
        }
    }

    /// Hand a copy to the memory sink without waiting on it
    fn forward(&self, record: &ChangeRecord) {
        let Some(sink) = &self.memory_sink else {
            return;
        };

        let sink = Arc::clone(sink);
        let entry = MemoryEntry::from_record(record);
        tokio::spawn(async move {
            let key = entry.key.clone();
            if let Err(e) = sink.save(entry).await {
                warn!("Memory store rejected {}: {:#}", key, e);
            }
        });
    }
}
