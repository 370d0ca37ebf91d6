//! Filesystem change detection for Warden
//!
//! Watches directory roots and reports content-level changes:
//! - Per-path debouncing of native notifications
//! - BLAKE3 classification into ADD / CHANGE / UNLINK, with no-op writes suppressed
//! - Rolling per-file backups and a bounded change history
//! - Broadcast event delivery

pub mod bus;
pub mod classify;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod ignore;
pub mod lane;
pub mod normalize;
pub mod scan;

pub use bus::{ErrorEvent, ErrorScope, EventBus, EventFilter, Subscription, WatchEvent};
pub use classify::{Classification, Classifier, SkipReason};
pub use config::{BackupConfig, WatchConfig};
pub use engine::{ChangeEngine, EngineBuilder};
pub use error::{Result, WatchError};
pub use ignore::{IgnoreConfig, IgnoreRules};

pub use warden_core::{ChangeKind, ChangeRecord, ContentHash};
