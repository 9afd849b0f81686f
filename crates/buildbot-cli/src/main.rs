//! Buildbot CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "buildbot")]
#[command(about = "Buildbot review verifier CLI", long_about = None)]
struct Cli {
    /// Path to the system configuration
    #[arg(long, env = "BUILDBOT_CONFIG", default_value = "buildbot.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the project/platform matrix
    Validate {
        /// Print the matrix as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one revision through every project with a local worker
    DryRun {
        /// Revision to build
        revision: String,
        /// Branch the revision belongs to
        #[arg(long, default_value = "master")]
        branch: String,
        /// Status the local worker reports for every task
        #[arg(long, default_value = "success")]
        status: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { json } => {
            commands::validate(&cli.config, json)?;
        }
        Commands::DryRun {
            revision,
            branch,
            status,
        } => {
            commands::dry_run(&cli.config, &revision, &branch, &status).await?;
        }
    }

    Ok(())
}
