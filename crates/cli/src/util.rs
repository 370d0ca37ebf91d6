//! Shared formatting helpers for CLI output

use chrono::{Local, TimeZone};

/// Wall-clock time of a Unix-millisecond timestamp ("14:30:05.123")
pub fn format_clock(ts_ms: u64) -> String {
    match Local.timestamp_millis_opt(ts_ms as i64).single() {
        Some(time) => time.format("%H:%M:%S%.3f").to_string(),
        None => format!("@{}", ts_ms),
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
