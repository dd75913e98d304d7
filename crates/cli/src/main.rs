//! Ralph CLI, the main entry point.
//!
//! Commands:
//! - `init`    Write a default config and a sample PRD
//! - `run`     Start a new run over the PRD
//! - `resume`  Continue a paused run or answer a pending question
//! - `status`  Show the persisted run

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ralph",
    about = "Ralph: drive a coding agent through a PRD, one story per iteration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the config file
    #[arg(
        short,
        long,
        global = true,
        env = "RALPH_CONFIG",
        default_value = ralph_config::DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and a sample PRD if they are missing
    Init,

    /// Start a new run
    Run {
        /// PRD file (defaults to `paths.prd` from the config)
        #[arg(long)]
        prd: Option<PathBuf>,

        /// Override the iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Override the agent name
        #[arg(long)]
        agent: Option<String>,

        /// Discard an unfinished run instead of refusing to start
        #[arg(long)]
        fresh: bool,
    },

    /// Resume the persisted run
    Resume {
        /// Answer to the pending human-input request
        #[arg(short, long)]
        response: Option<String>,
    },

    /// Show the persisted run
    Status {
        /// Print the state snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run(&cli.config)?,
        Commands::Run {
            prd,
            max_iterations,
            agent,
            fresh,
        } => {
            let args = commands::run::RunArgs {
                prd,
                max_iterations,
                agent,
                fresh,
            };
            commands::run::run(&cli.config, args).await?
        }
        Commands::Resume { response } => commands::resume::run(&cli.config, response).await?,
        Commands::Status { json } => commands::status::run(&cli.config, json).await?,
    }

    Ok(())
}
