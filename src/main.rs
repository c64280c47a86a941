//! kg-sync CLI
//!
//! Applies change files through sync passes and manages rollback points over the
//! JSON stores in the configured data directory.

use clap::Parser;
use kg_sync::cli::{
    args::{Cli, Commands, PointsAction},
    commands::{points, rollback, status, sync},
};
use kg_sync::models::change::SyncOptions;
use kg_sync::models::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync {
            changes_file,
            force,
            include_embeddings,
            include_tests,
            include_security,
        } => {
            let options = SyncOptions {
                force,
                include_embeddings,
                include_tests,
                include_security,
            };
            sync::sync(&config, &changes_file, options).await?;
        }

        Commands::Points { action } => match action {
            PointsAction::List => {
                points::list_points(&config).await?;
            }
            PointsAction::Show { point_id } => {
                points::show_point(&config, &point_id).await?;
            }
            PointsAction::Diff { from, to } => {
                points::diff_points(&config, &from, to.as_deref()).await?;
            }
            PointsAction::Cleanup => {
                points::cleanup(&config).await?;
            }
        },

        Commands::Rollback {
            point_id,
            strategy,
            on_conflict,
            dry_run,
        } => {
            rollback::rollback(&config, &point_id, strategy, on_conflict, dry_run).await?;
        }

        Commands::Status { json } => {
            status::status(&config, json).await?;
        }
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("kg_sync=debug")
    } else {
        EnvFilter::new("kg_sync=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
