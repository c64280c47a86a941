//! Rollback command implementation.
//!
//! Restores a rollback point into the JSON stores, showing progress from the
//! engine's event stream. With `--on-conflict ask_user` each conflict is put to the
//! terminal.

use super::{engine_builder, preview, restore_monitor, save_monitor};
use crate::core::conflict::DecisionRequest;
use crate::core::events::EventTopic;
use crate::core::executor::RestoreRequest;
use crate::models::config::Config;
use crate::models::conflict::{ConflictStrategy, Decision, RollbackConflict};
use crate::models::operation::{LogLevel, OperationStatus, RollbackStrategy};
use crate::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Restore `point_id`.
pub async fn rollback(
    config: &Config,
    point_id: &str,
    strategy: RollbackStrategy,
    on_conflict: ConflictStrategy,
    dry_run: bool,
) -> Result<()> {
    println!("{}", "[ROLLBACK] Rollback command".bold().cyan());
    println!();
    println!("  {} {}", "Point:".bold(), point_id);
    println!("  {} {}", "Strategy:".bold(), strategy);
    println!();

    let (tx, rx) = mpsc::channel(8);
    let engine = engine_builder(config).decisions(tx).build()?;
    restore_monitor(config, &engine)?;

    if dry_run {
        println!("{}", "[DRY-RUN] Checking conflicts, nothing will be written".bold().yellow());
        println!();
    }

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    let listener = spawn_progress(engine.subscribe(), pb.clone());
    let prompter = spawn_prompter(rx, pb.clone());

    let mut request = RestoreRequest::new(strategy).with_conflict_strategy(on_conflict);
    if dry_run {
        request = request.dry_run();
    }
    let result = engine.executor().restore(point_id, request).await;

    listener.abort();
    prompter.abort();
    pb.finish_and_clear();
    save_monitor(config, &engine)?;

    let op = match result {
        Ok(op) => op,
        Err(crate::Error::RollbackConflict {
            operation_id,
            conflicts,
        }) => {
            println!("{}", "[FAILED] Rollback aborted by conflicts:".red().bold());
            for conflict in &conflicts {
                print_conflict(conflict);
            }
            println!();
            println!("  Retry with {} or {}.", "--on-conflict skip".bold(), "--on-conflict overwrite".bold());
            return Err(crate::Error::RollbackConflict {
                operation_id,
                conflicts,
            });
        }
        Err(e) => return Err(e),
    };

    println!("{}", "Log:".bold());
    for entry in &op.log {
        let level = match entry.level {
            LogLevel::Info => "INFO ".normal(),
            LogLevel::Warn => "WARN ".yellow(),
            LogLevel::Error => "ERROR".red(),
        };
        println!("  {} {}", level, entry.message);
    }
    println!();

    match op.status {
        OperationStatus::Completed if dry_run => {
            println!("{}", "[OK] Dry run complete - no changes were made".green())
        }
        OperationStatus::Completed => println!(
            "{} Rollback {} completed in {:.1} ms",
            "[OK]".green(),
            op.id,
            op.duration_ms().unwrap_or(0.0)
        ),
        status => println!("{} Rollback {} ended {}", "[WARN]".yellow(), op.id, status),
    }
    Ok(())
}

fn spawn_progress(
    mut rx: broadcast::Receiver<crate::core::events::EngineEvent>,
    pb: ProgressBar,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.topic {
                    EventTopic::RollbackProgress => {
                        pb.set_position(event.payload["progress"].as_u64().unwrap_or(0));
                    }
                    EventTopic::ConflictDetected => {
                        let path = event.payload["conflict"]["path"].as_str().unwrap_or("?");
                        pb.set_message(format!("conflict at {}", path));
                    }
                    _ => {}
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_prompter(mut rx: mpsc::Receiver<DecisionRequest>, pb: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let conflict = request.conflict.clone();
            let bar = pb.clone();
            let decision = tokio::task::spawn_blocking(move || bar.suspend(|| prompt(&conflict)))
                .await
                .unwrap_or(Decision::Abort);
            let _ = request.reply.send(decision);
        }
    })
}

fn prompt(conflict: &RollbackConflict) -> Decision {
    println!();
    print_conflict(conflict);
    print!("  [o]verwrite / [s]kip / [a]bort: ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return Decision::Abort;
    }
    match line.trim().to_lowercase().as_str() {
        "o" | "overwrite" => Decision::Overwrite,
        "s" | "skip" => Decision::Skip,
        _ => Decision::Abort,
    }
}

fn print_conflict(conflict: &RollbackConflict) {
    println!(
        "  {} {} {}",
        conflict.conflict_type.to_string().yellow(),
        conflict.kind,
        conflict.path.bold()
    );
    println!("    live:     {}", preview(conflict.current_value.as_ref()));
    println!("    rollback: {}", preview(conflict.rollback_value.as_ref()));
}
