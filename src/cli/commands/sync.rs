//! Sync command implementation.
//!
//! Loads a JSON array of changes, queues them and runs one sync pass.

use super::{open_engine, save_monitor};
use crate::models::change::{ChangeEvent, SyncOptions};
use crate::models::config::Config;
use crate::utils::fs as fs_utils;
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Apply the changes in `changes_file`.
pub async fn sync(config: &Config, changes_file: &Path, options: SyncOptions) -> Result<()> {
    println!("{}", "[SYNC] Sync pass".bold().cyan());
    println!();

    if !changes_file.exists() {
        return Err(crate::Error::other(format!(
            "Changes file not found: {}",
            changes_file.display()
        )));
    }
    let changes: Vec<ChangeEvent> = fs_utils::read_json(changes_file)?;
    println!("[INFO] Loaded {} change(s) from {}", changes.len(), changes_file.display());

    let engine = open_engine(config)?;
    let coordinator = engine.coordinator();
    coordinator.enqueue_all(changes);

    let result = coordinator.run_pass(options).await;
    save_monitor(config, &engine)?;
    let report = result?;

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} {}", "Batches:".bold(), report.batches);
    println!("  {} {}", "Applied:".bold(), report.applied.to_string().green());
    if report.failed_batches > 0 {
        println!(
            "  {} {} ({} rolled back)",
            "Failed batches:".bold(),
            report.failed_batches.to_string().red(),
            report.rolled_back
        );
    }
    if report.remaining > 0 {
        println!(
            "  {} {} (excluded by sync options)",
            "Held back:".bold(),
            report.remaining.to_string().yellow()
        );
    }
    for point_id in &report.points {
        println!("  {} {}", "Rollback point:".bold(), point_id);
    }
    if config.rollback.auto_cleanup {
        let cleanup = engine.cleanup().await?;
        if !cleanup.removed.is_empty() {
            println!("  {} {}", "Points evicted:".bold(), cleanup.removed.len());
        }
        save_monitor(config, &engine)?;
    }
    println!();

    let status = engine.status();
    if status.errors.recent.is_empty() {
        println!("{}", "[OK] Sync completed".green());
    } else {
        println!("{}", "[WARN] Sync completed with errors:".yellow());
        for error in &status.errors.recent {
            println!("  - {}", error);
        }
    }
    Ok(())
}
