//! Command line argument definitions.

use crate::models::conflict::ConflictStrategy;
use crate::models::operation::RollbackStrategy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// kg-sync - Sync knowledge store changes with checkpoints and rollback
#[derive(Parser, Debug)]
#[command(name = "kg-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config.toml (default: ~/.config/kg_sync/config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply a file of changes in one sync pass
    Sync {
        /// Path to a JSON array of changes
        #[arg(value_name = "CHANGES_FILE")]
        changes_file: PathBuf,

        /// Apply everything queued as one batch, ignoring the batch size
        #[arg(long)]
        force: bool,

        /// Include embedding changes
        #[arg(long)]
        include_embeddings: bool,

        /// Include test changes
        #[arg(long)]
        include_tests: bool,

        /// Include security changes
        #[arg(long)]
        include_security: bool,
    },

    /// Inspect and maintain rollback points
    Points {
        #[command(subcommand)]
        action: PointsAction,
    },

    /// Restore a rollback point
    Rollback {
        /// Rollback point ID
        #[arg(value_name = "POINT_ID")]
        point_id: String,

        /// Rollback strategy: immediate, gradual, safe, force
        #[arg(short, long, default_value = "safe")]
        strategy: RollbackStrategy,

        /// Conflict policy: abort, skip, overwrite, merge, ask_user
        #[arg(long, default_value = "abort")]
        on_conflict: ConflictStrategy,

        /// Dry run - report conflicts without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show sync status and rollback metrics
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PointsAction {
    /// List rollback points
    List,

    /// Show a rollback point and its snapshots
    Show {
        /// Rollback point ID
        #[arg(value_name = "POINT_ID")]
        point_id: String,
    },

    /// Diff a point against another point, or against live state
    Diff {
        /// Source point ID
        #[arg(value_name = "FROM")]
        from: String,

        /// Target point ID (default: live state)
        #[arg(value_name = "TO")]
        to: Option<String>,
    },

    /// Remove expired and surplus points
    Cleanup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rollback_args() {
        let cli = Cli::parse_from([
            "kg-sync",
            "rollback",
            "rp-1",
            "--strategy",
            "gradual",
            "--on-conflict",
            "ask_user",
        ]);
        match cli.command {
            Commands::Rollback {
                point_id,
                strategy,
                on_conflict,
                dry_run,
            } => {
                assert_eq!(point_id, "rp-1");
                assert_eq!(strategy, RollbackStrategy::Gradual);
                assert_eq!(on_conflict, ConflictStrategy::AskUser);
                assert!(!dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_points_diff_without_target() {
        let cli = Cli::parse_from(["kg-sync", "-v", "points", "diff", "rp-1"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Points {
                action: PointsAction::Diff { to: None, .. }
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["kg-sync", "rollback", "rp-1", "--strategy", "later"]).is_err());
    }
}
