//! Ignore pattern management
//!
//! Supports multiple sources of ignore patterns:
//! 1. Excluded directories (the backup archive - always active)
//! 2. Built-in noise patterns (optional, enabled by default)
//! 3. Config-based patterns (evaluated after the built-ins, so `!pattern`
//!    can re-include something a default excludes)
//! 4. Each root's .gitignore (optional)
//!
//! Patterns use gitignore syntax and are matched against the path relative
//! to its watched root. A directory pattern covers everything beneath it.

use crate::error::{Result, WatchError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Noise filtered out before debouncing unless `use_defaults` is off
pub const DEFAULT_PATTERNS: &[&str] = &[
    // Dependencies
    "node_modules/",
    "bower_components/",
    "vendor/",
    ".venv/",
    "__pycache__/",
    // VCS metadata
    ".git/",
    ".svn/",
    ".hg/",
    ".jj/",
    // Build output
    "dist/",
    "build/",
    "target/",
    "out/",
    ".next/",
    "coverage/",
    // Environment and secrets
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    // Logs
    "*.log",
    "logs/",
    // Binary images
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.bmp",
    "*.ico",
    "*.webp",
    "*.tiff",
    // Editor droppings
    "*.swp",
    "*~",
    ".DS_Store",
];

/// Ignore rule manager shared by every watched root
pub struct IgnoreRules {
    /// Built-in + configured patterns
    patterns: Gitignore,

    /// Per-root .gitignore matchers (only when enabled)
    gitignores: RwLock<HashMap<PathBuf, Gitignore>>,

    /// Directories whose contents are never reported
    excluded_dirs: Vec<PathBuf>,

    config: IgnoreConfig,
}

impl IgnoreRules {
    /// Compile the built-in and configured patterns
    pub fn new(config: IgnoreConfig) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");

        if config.use_defaults {
            for pattern in DEFAULT_PATTERNS {
                add_pattern(&mut builder, pattern)?;
            }
        }
        for pattern in &config.patterns {
            add_pattern(&mut builder, pattern)?;
        }

        let patterns = builder
            .build()
            .map_err(|e| WatchError::InvalidConfig(format!("invalid ignore patterns: {e}")))?;

        Ok(Self {
            patterns,
            gitignores: RwLock::new(HashMap::new()),
            excluded_dirs: Vec::new(),
            config,
        })
    }

    /// Never report anything inside `dir`
    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded_dirs.push(dir.into());
        self
    }

    /// Load a root's .gitignore if enabled
    pub fn add_root(&self, root: &Path) {
        if !self.config.use_gitignore {
            return;
        }

        let gitignore_path = root.join(".gitignore");
        if !gitignore_path.exists() {
            return;
        }

        let mut builder = GitignoreBuilder::new(root);
        if let Some(err) = builder.add(&gitignore_path) {
            warn!("Partially parsed {}: {}", gitignore_path.display(), err);
        }
        match builder.build() {
            Ok(gitignore) => {
                debug!("Loaded {} ignore rules from {}", gitignore.num_ignores(), gitignore_path.display());
                self.gitignores.write().insert(root.to_path_buf(), gitignore);
            }
            Err(e) => warn!("Ignoring unreadable {}: {}", gitignore_path.display(), e),
        }
    }

    /// Forget a root's .gitignore
    pub fn remove_root(&self, root: &Path) {
        self.gitignores.write().remove(root);
    }

    /// Check if a signalled path under `root` should be dropped.
    ///
    /// The path is matched as a file and never stat'ed; directory patterns
    /// still cover it through its parents.
    pub fn should_ignore(&self, root: &Path, path: &Path) -> bool {
        self.should_ignore_entry(root, path, false)
    }

    /// Like [`should_ignore`](Self::should_ignore) for an entry whose type
    /// is already known, such as one produced by a directory walk
    pub fn should_ignore_entry(&self, root: &Path, path: &Path, is_dir: bool) -> bool {
        if self.excluded_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }

        // Paths outside the root only get their file name matched
        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => match path.file_name() {
                Some(name) => Path::new(name),
                None => return false,
            },
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        if self
            .patterns
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
        {
            return true;
        }

        if let Some(gitignore) = self.gitignores.read().get(root) {
            if gitignore.matched_path_or_any_parents(relative, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }

    /// Get number of active ignore sources
    pub fn active_sources(&self) -> usize {
        let mut count = 0;
        if !self.excluded_dirs.is_empty() {
            count += 1;
        }
        if !self.patterns.is_empty() {
            count += 1;
        }
        count + self.gitignores.read().len()
    }
}

fn add_pattern(builder: &mut GitignoreBuilder, pattern: &str) -> Result<()> {
    builder
        .add_line(None, pattern)
        .map(|_| ())
        .map_err(|e| WatchError::InvalidConfig(format!("invalid ignore pattern '{pattern}': {e}")))
}

/// Ignore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Apply `DEFAULT_PATTERNS` (default: true)
    #[serde(default = "default_true")]
    pub use_defaults: bool,

    /// Honor each root's .gitignore (default: false)
    #[serde(default)]
    pub use_gitignore: bool,

    /// Additional gitignore-syntax patterns
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_defaults: true,
            use_gitignore: false,
            patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
