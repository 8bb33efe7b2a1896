//! beacon command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Distributed job scheduler and article ranking", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, env = "BEACON_CONFIG", default_value = "beacon.kdl")]
    config: String,

    /// Database URL, overrides the one in the configuration file
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file, defaults to --config
        path: Option<String>,
    },
    /// Show the cached article ranking
    Ranking {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// List scheduled jobs
    Jobs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run => {
            commands::run::run_scheduler(&cli.config, cli.database_url).await?;
        }
        Commands::Validate { path } => {
            commands::validate(path.as_deref().unwrap_or(&cli.config))?;
        }
        Commands::Ranking { json } => {
            commands::ranking::show(&cli.config, cli.database_url, json).await?;
        }
        Commands::Jobs => {
            commands::jobs::list(&cli.config, cli.database_url).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
