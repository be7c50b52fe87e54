use clap::{Parser, Subcommand};
use colored::*;
use std::process;

mod cli;

use cli::functions::FunctionsCommands;

/// Log level used when RUST_LOG is unset; keeps function output readable
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser)]
#[command(name = "fnserve")]
#[command(about = "fnserve - run edge functions locally in a Docker sandbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage edge functions
    #[command(subcommand)]
    Functions(FunctionsCommands),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Functions(command) => command.execute().await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}
