//! Points command implementation.

use super::{format_size, open_engine, preview};
use crate::models::config::Config;
use crate::models::diff::DiffOperation;
use crate::Result;
use colored::Colorize;

/// List all rollback points, newest first.
pub async fn list_points(config: &Config) -> Result<()> {
    println!("{}", "Rollback points".bold().cyan());
    println!();

    let engine = open_engine(config)?;
    let mut points = engine.manager().list_points().await?;
    if points.is_empty() {
        println!("No rollback points found.");
        return Ok(());
    }
    points.reverse();

    println!(
        "{:<38} {:<20} {:<10} {:<10} {}",
        "ID".bold(),
        "Created".bold(),
        "Snapshots".bold(),
        "Size".bold(),
        "Name".bold()
    );
    println!("{}", "-".repeat(100));

    for point in &points {
        let name = if point.is_expired() {
            format!("{} {}", point.name, "(expired)".red())
        } else {
            point.name.clone()
        };
        println!(
            "{:<38} {:<20} {:<10} {:<10} {}",
            point.id,
            point.timestamp.format("%Y-%m-%d %H:%M:%S"),
            point.snapshot_ids.len(),
            format_size(point.total_size),
            name
        );
    }

    println!();
    println!("Snapshot directory: {}", config.rollback_dir().display());
    Ok(())
}

/// Show one point and its snapshots.
pub async fn show_point(config: &Config, point_id: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let record = engine.manager().load(point_id).await?;
    let point = &record.point;

    println!("{} {}", "Rollback point:".bold().cyan(), point.id);
    println!();
    println!("  {} {}", "Name:".bold(), point.name);
    println!("  {} {}", "Created:".bold(), point.timestamp.to_rfc3339());
    if let Some(description) = &point.description {
        println!("  {} {}", "Description:".bold(), description);
    }
    if let Some(session_id) = &point.session_id {
        println!("  {} {}", "Session:".bold(), session_id);
    }
    match point.expires_at {
        Some(expires_at) if point.is_expired() => {
            println!("  {} {}", "Expired:".bold(), expires_at.to_rfc3339().red())
        }
        Some(expires_at) => println!("  {} {}", "Expires:".bold(), expires_at.to_rfc3339()),
        None => println!("  {} never", "Expires:".bold()),
    }
    println!("  {} {}", "Size:".bold(), format_size(record.size()));
    println!();

    println!("{}", "Snapshots:".bold());
    for snapshot in &record.snapshots {
        println!(
            "  {:<14} {:<40} {}",
            snapshot.snapshot_type.to_string(),
            snapshot.path,
            preview(snapshot.data.as_ref())
        );
    }
    Ok(())
}

/// Diff a point against another point, or against live state.
pub async fn diff_points(config: &Config, from: &str, to: Option<&str>) -> Result<()> {
    let engine = open_engine(config)?;
    let diff = match to {
        Some(to) => engine.manager().diff(from, to).await?,
        None => engine.manager().diff_live(from).await?,
    };

    println!(
        "{} {} -> {}",
        "Diff:".bold().cyan(),
        diff.from,
        diff.to
    );
    println!();

    if diff.is_empty() {
        println!("{}", "No changes.".green());
        return Ok(());
    }

    for entry in &diff.entries {
        let label = match entry.operation {
            DiffOperation::Create => "+ create".green(),
            DiffOperation::Update => "~ update".yellow(),
            DiffOperation::Delete => "- delete".red(),
            DiffOperation::Move => "> move  ".cyan(),
        };
        match entry.moved_from() {
            Some(from_path) => println!("  {} {} {} -> {}", label, entry.kind, from_path, entry.path),
            None => println!(
                "  {} {} {}: {} -> {}",
                label,
                entry.kind,
                entry.path,
                preview(entry.old_value.as_ref()),
                preview(entry.new_value.as_ref())
            ),
        }
    }
    println!();
    println!("{} change(s)", diff.change_count);
    Ok(())
}

/// Remove expired and surplus points.
pub async fn cleanup(config: &Config) -> Result<()> {
    let engine = open_engine(config)?;
    let report = engine.cleanup().await?;

    if report.removed.is_empty() {
        println!("{}", "[OK] Nothing to clean up".green());
    } else {
        println!(
            "{} Removed {} rollback point(s)",
            "[OK]".green(),
            report.removed.len()
        );
        for id in &report.removed {
            println!("  - {}", id);
        }
    }
    Ok(())
}
