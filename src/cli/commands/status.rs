//! Status command implementation.
//!
//! Each CLI run is its own process, so counters come from the state saved by the
//! last `sync` or `rollback` and point gauges are read from the snapshot store.

use super::{format_size, load_monitor_state, open_engine};
use crate::models::config::Config;
use crate::models::status::{RollbackMetrics, SyncStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::json;

/// Saved sync status and current rollback metrics.
pub struct StatusReport {
    pub status: SyncStatus,
    pub metrics: RollbackMetrics,
    /// When the counters were saved, `None` before the first `sync` or `rollback`.
    pub recorded_at: Option<DateTime<Utc>>,
}

pub async fn collect(config: &Config) -> Result<StatusReport> {
    let engine = open_engine(config)?;
    engine.manager().refresh_gauges().await;
    let mut status = engine.status();
    let saved = load_monitor_state(config)?;
    if let Some(saved) = &saved {
        status.processing_rate = saved.processing_rate;
        status.performance = saved.performance.clone();
    }
    Ok(StatusReport {
        status,
        metrics: engine.metrics(),
        recorded_at: saved.map(|s| s.recorded_at),
    })
}

/// Print sync status and rollback metrics.
pub async fn status(config: &Config, as_json: bool) -> Result<()> {
    let StatusReport {
        status,
        metrics,
        recorded_at,
    } = collect(config).await?;

    if as_json {
        let body = json!({ "status": status, "metrics": metrics, "recordedAt": recorded_at });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{}", "Sync status".bold().cyan());
    println!();
    match recorded_at {
        Some(at) => println!("  {} {}", "Recorded:".bold(), at.to_rfc3339()),
        None => println!("  {}", "No sync or rollback has run yet".dimmed()),
    }
    let active = if status.is_active {
        "active".green()
    } else {
        "idle".normal()
    };
    println!("  {} {}", "State:".bold(), active);
    println!(
        "  {} {}",
        "Last sync:".bold(),
        status
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  {} {}", "Queue depth:".bold(), status.queue_depth);
    println!("  {} {:.2}/s", "Processing rate:".bold(), status.processing_rate);
    println!("  {} {:.0}%", "Success rate:".bold(), status.performance.success_rate * 100.0);
    println!("  {} {}", "Errors:".bold(), status.errors.count);
    for error in &status.errors.recent {
        println!("    - {}", error.red());
    }
    println!();

    println!("{}", "Rollback metrics".bold().cyan());
    println!();
    println!("  {} {}", "Rollback points:".bold(), metrics.total_rollback_points);
    println!("  {} {}", "Snapshot data:".bold(), format_size(metrics.memory_usage));
    println!(
        "  {} {} ok, {} failed",
        "Rollbacks:".bold(),
        metrics.successful_rollbacks,
        metrics.failed_rollbacks
    );
    println!(
        "  {} {:.1} ms",
        "Average rollback:".bold(),
        metrics.average_rollback_time
    );
    if let Some(last_cleanup) = metrics.last_cleanup {
        println!("  {} {}", "Last cleanup:".bold(), last_cleanup.to_rfc3339());
    }
    Ok(())
}
