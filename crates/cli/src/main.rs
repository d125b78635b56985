//! Stepwise CLI — the main entry point.
//!
//! Commands:
//! - `run`    — Replay a scripted session through an orchestrator
//! - `config` — Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stepwise::commands;
use stepwise::commands::run::RunArgs;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise — step-by-step agent execution engine",
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
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session and print the final state as JSON
    Run(RunArgs),

    /// Print the effective configuration as TOML
    Config {
        /// Config file to read (defaults to ./stepwise.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    stepwise::logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Config { path } => commands::config_cmd::run(path)?,
    }

    Ok(())
}
