//! Engine configuration
//!
//! Every field except `roots` has a default, so a minimal config file is:
//!
//! ```toml
//! roots = ["/home/me/project"]
//! ```

use crate::error::{Result, WatchError};
use crate::ignore::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Root directories to observe (required, non-empty)
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Quiet window before a path settles (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Change records retained in memory (default: 10000)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Buffered events per subscriber before it starts lagging (default: 1024)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Seed hashes for files already present when a root is added (default: false)
    #[serde(default)]
    pub scan_existing: bool,

    #[serde(default)]
    pub ignore: IgnoreConfig,

    #[serde(default)]
    pub backup: BackupConfig,
}

/// Backup archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Archive added/changed files (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Archive directory; relative paths resolve against the working directory
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Copies kept per original basename (default: 10)
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_backup_dir(),
            max_backups: default_max_backups(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            debounce_ms: default_debounce_ms(),
            history_limit: default_history_limit(),
            event_capacity: default_event_capacity(),
            scan_existing: false,
            ignore: IgnoreConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Config watching the given roots with every other field defaulted
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| WatchError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|source| WatchError::ConfigParse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(WatchError::InvalidConfig(
                "at least one root path is required".to_string(),
            ));
        }
        if self.roots.iter().any(|r| r.as_os_str().is_empty()) {
            return Err(WatchError::InvalidConfig("root paths must not be empty".to_string()));
        }
        if self.backup.enabled && self.backup.max_backups == 0 {
            return Err(WatchError::InvalidConfig(
                "backup.max_backups must be at least 1".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(WatchError::InvalidConfig(
                "history_limit must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(WatchError::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Backup directory as an absolute path
    pub fn resolved_backup_dir(&self) -> Result<PathBuf> {
        if self.backup.dir.is_absolute() {
            Ok(self.backup.dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.backup.dir))
        }
    }

    /// Example configuration with every field spelled out
    pub fn example_toml() -> &'static str {
        EXAMPLE_CONFIG
    }
}

const EXAMPLE_CONFIG: &str = r#"# Warden change engine configuration

# Directories to observe (required)
roots = ["./docs", "./cases"]

# Quiet window before a path settles, in milliseconds
debounce_ms = 500

# Change records kept in memory
history_limit = 10000

# Events buffered per subscriber
event_capacity = 1024

# Seed hashes for files that already exist when a root is added
scan_existing = false

[ignore]
# Built-in noise filters (dependency, VCS and build dirs, secrets, logs, images)
use_defaults = true
# Also honor each root's .gitignore
use_gitignore = false
# Extra gitignore-syntax patterns
patterns = ["*.tmp", "scratch/"]

[backup]
enabled = true
dir = ".warden/backups"
max_backups = 10
"#;

fn default_debounce_ms() -> u64 {
    500
}

fn default_history_limit() -> usize {
    warden_journal::history::DEFAULT_HISTORY_LIMIT
}

fn default_event_capacity() -> usize {
    1024
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".warden/backups")
}

fn default_max_backups() -> usize {
    10
}

fn default_true() -> bool {
    true
}
