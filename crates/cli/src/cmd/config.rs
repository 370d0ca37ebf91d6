//! Configuration commands

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use warden_watcher::WatchConfig;

/// Show example configuration
pub fn run_example() -> Result<()> {
    print!("{}", WatchConfig::example_toml());
    Ok(())
}

/// Load a config file and report what it resolves to
pub fn run_check(path: &Path) -> Result<()> {
    let config = WatchConfig::load(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("{} {}", "✓".green(), path.display());
    println!("  {} = {}", "roots".cyan(), config.roots.len());
    for root in &config.roots {
        let marker = if root.is_dir() {
            "ok".green().to_string()
        } else {
            "missing".red().to_string()
        };
        println!("    {} {}", root.display(), marker);
    }
    println!("  {} = {}", "debounce_ms".cyan(), config.debounce_ms);
    println!("  {} = {}", "history_limit".cyan(), config.history_limit);
    println!("  {} = {}", "scan_existing".cyan(), config.scan_existing);
    println!(
        "  {} = {} {}",
        "ignore.patterns".cyan(),
        config.ignore.patterns.len(),
        if config.ignore.use_defaults {
            "(+ defaults)".dimmed().to_string()
        } else {
            String::new()
        }
    );
    if config.backup.enabled {
        println!(
            "  {} = {} {}",
            "backup.dir".cyan(),
            config.backup.dir.display(),
            format!("(keep {})", config.backup.max_backups).dimmed()
        );
    } else {
        println!("  {} = {}", "backup".cyan(), "disabled".yellow());
    }

    Ok(())
}
