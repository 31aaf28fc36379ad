//! ganglet CLI
//!
//! Command-line client for the ganglet scheduler daemon's status API.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ganglet - batch-aware gang scheduler for GPU clusters
#[derive(Parser, Debug)]
#[command(name = "ganglet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9480", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show scheduler status and cycle metrics
    Status,

    /// Show node GPU accounting
    Nodes,

    /// Show pod-groups and their phases
    Podgroups,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Nodes => {
            commands::nodes(&client).await?;
        }
        Commands::Podgroups => {
            commands::podgroups(&client).await?;
        }
    }

    Ok(())
}
