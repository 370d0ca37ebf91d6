//! Warden Core - primitives shared by the change engine
//!
//! This crate provides:
//! - BLAKE3 content hashing
//! - The immutable change record handed to subscribers, history and backups

pub mod hash;
pub mod record;

// Re-export main types for convenience
pub use hash::{hash_bytes, hash_file, ContentHash};
pub use record::{now_unix_ms, ChangeKind, ChangeRecord};

/// Common result type used throughout warden-core
pub type Result<T> = anyhow::Result<T>;
