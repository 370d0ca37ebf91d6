//! Run the change engine in the foreground

use crate::util;
use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use warden_core::ChangeKind;
use warden_journal::SledMemoryStore;
use warden_watcher::{ChangeEngine, ChangeRecord, ErrorEvent, ErrorScope, WatchConfig, WatchEvent};

#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    /// Directories to watch (added to any roots from --config)
    pub roots: Vec<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Quiet window in milliseconds before a path settles
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Don't archive added or changed files
    #[arg(long)]
    pub no_backup: bool,

    /// Backup archive directory
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Backups kept per file name
    #[arg(long)]
    pub max_backups: Option<usize>,

    /// Seed hashes for files already present at startup
    #[arg(long)]
    pub scan: bool,

    /// Persist change records to a sled database in this directory
    #[arg(long)]
    pub memory_db: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Merge the config file (if any) with command-line overrides
pub fn build_config(args: &WatchArgs) -> Result<WatchConfig> {
    let mut config = match &args.config {
        Some(path) => WatchConfig::load(path)?,
        None => WatchConfig::default(),
    };

    config.roots.extend(args.roots.iter().cloned());
    if config.roots.is_empty() {
        config.roots.push(std::env::current_dir().context("Failed to get current directory")?);
    }

    if let Some(debounce_ms) = args.debounce_ms {
        config.debounce_ms = debounce_ms;
    }
    if args.no_backup {
        config.backup.enabled = false;
    }
    if let Some(dir) = &args.backup_dir {
        config.backup.dir = dir.clone();
    }
    if let Some(max_backups) = args.max_backups {
        config.backup.max_backups = max_backups;
    }
    if args.scan {
        config.scan_existing = true;
    }

    config.validate()?;
    Ok(config)
}

pub async fn run(args: WatchArgs) -> Result<()> {
    let config = build_config(&args)?;

    let mut builder = ChangeEngine::builder_for(&config);
    if let Some(dir) = &args.memory_db {
        let store = SledMemoryStore::open(dir)
            .with_context(|| format!("Failed to open memory store at {}", dir.display()))?;
        builder = builder.memory_sink(Arc::new(store));
    }
    let engine = builder.build();

    let mut events = engine.subscribe();
    engine.start(config.clone()).await?;

    if !args.json {
        println!("{}", "Watching".bold());
        for root in engine.watched_paths() {
            println!("  {}", root.display().to_string().cyan());
        }
        if config.backup.enabled {
            println!(
                "{} {} {}",
                "Backups:".dimmed(),
                config.backup.dir.display(),
                format!("(keep {})", config.backup.max_backups).dimmed()
            );
        }
        println!("{}", "Press Ctrl-C to stop".dimmed());
        println!();
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => print_event(&event, args.json),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Display fell behind, {} events skipped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.stop();
    info!("Shutting down");

    if !args.json {
        print_summary(&engine.change_history(None), engine.tracked_files());
    }

    Ok(())
}

fn print_event(event: &WatchEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
        return;
    }

    match event {
        WatchEvent::Changed(record) => print_change(record),
        WatchEvent::Errored(error) => print_error(error),
    }
}

fn print_change(record: &ChangeRecord) {
    let time = util::format_clock(record.timestamp_ms()).dimmed().to_string();
    let label = match record.kind() {
        ChangeKind::Add => "ADD   ".green().to_string(),
        ChangeKind::Change => "CHANGE".yellow().to_string(),
        ChangeKind::Unlink => "UNLINK".red().to_string(),
    };

    match (record.hash(), record.size()) {
        (Some(hash), Some(size)) => println!(
            "{} {} {} {}",
            time,
            label,
            record.path().display(),
            format!("{} {}", hash.short(), util::format_size(size)).dimmed()
        ),
        _ => println!("{} {} {}", time, label, record.path().display()),
    }
}

fn print_error(error: &ErrorEvent) {
    let (scope, path) = match &error.scope {
        ErrorScope::Path(path) => ("path", path),
        ErrorScope::Root(path) => ("root", path),
    };
    eprintln!(
        "{} {} {}: {}",
        "ERROR".red().bold(),
        scope.dimmed(),
        path.display(),
        error.cause
    );
}

fn print_summary(history: &[ChangeRecord], tracked: usize) {
    let count = |kind: ChangeKind| history.iter().filter(|r| r.kind() == kind).count();

    println!();
    println!("{}", "Session Summary".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Added:      {}", count(ChangeKind::Add).to_string().green());
    println!("Changed:    {}", count(ChangeKind::Change).to_string().yellow());
    println!("Unlinked:   {}", count(ChangeKind::Unlink).to_string().red());
    println!("Tracked:    {}", tracked);
}
