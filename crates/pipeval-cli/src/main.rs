//! pipeval - Pipeline promotion validator.
//!
//! CLI for validating that a code change propagates through a multi-stage
//! deployment pipeline: CI build, merge-request gates, GitOps sync, and
//! running workloads, cascaded across environments.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// pipeval - Pipeline promotion validator.
#[derive(Parser, Debug)]
#[command(name = "pipeval")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the validator configuration file.
    #[arg(short, long, default_value = "pipeval.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline validation.
    Run(commands::run::RunArgs),

    /// Probe reachability and authentication of all four systems.
    Preflight(commands::preflight::PreflightArgs),

    /// Configuration inspection commands.
    #[command(subcommand)]
    Config(commands::config::ConfigCommands),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match cli.command {
        Commands::Run(args) => commands::run::execute(&cli.config, &args),
        Commands::Preflight(args) => commands::preflight::execute(&cli.config, &args),
        Commands::Config(command) => commands::config::execute(&cli.config, &command),
    };

    match code {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        },
    }
}
