use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "podlink-cli")]
#[command(about = "Links podcast channels and episodes across YouTube and Spotify")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one mapping pass over the current snapshots.
    Sync,
    /// Run mapping passes on SYNC_CRON until interrupted.
    Schedule,
    /// Summarize the most recent runs under reports/.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        workspace_root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = podlink_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} channels={} episodes={} skipped={} discrepancies={} reports={}",
                summary.run_id,
                summary.canonical_channels,
                summary.canonical_episodes,
                summary.skipped_channels,
                summary.discrepancies,
                summary.reports_dir
            );
        }
        Commands::Schedule => {
            podlink_sync::run_scheduler_from_env().await?;
        }
        Commands::Report {
            runs,
            workspace_root,
        } => {
            let workspace_root = workspace_root
                .or_else(|| std::env::var("PODLINK_WORKSPACE_ROOT").ok().map(PathBuf::from));
            println!("{}", podlink_sync::report_recent_runs_markdown(runs, workspace_root)?);
        }
    }

    Ok(())
}
