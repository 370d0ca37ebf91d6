//! Change history, backup rotation and persistence side channel
//!
//! This crate provides:
//! - In-process, arrival-ordered change history
//! - Timestamped backup archive with per-file retention
//! - Best-effort memory store collaborator (sled embedded DB)

pub mod archive;
pub mod history;
pub mod memory;

// Re-exports
pub use archive::{BackupArchiver, BackupEntry};
pub use history::ChangeHistory;
pub use memory::{MemoryEntry, MemorySink, Priority, SledMemoryStore};

/// Result type for journal operations
pub type Result<T> = anyhow::Result<T>;
