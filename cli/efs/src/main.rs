//! EFS CLI: parse expressions, check models and run evaluation cycles.

mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "efs", version, about = "EFS expression compiler and rule engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an expression or statement and print its normalised form
    Parse {
        /// Text to parse
        text: String,
        /// Parse as a statement instead of an expression
        #[arg(long)]
        statement: bool,
    },
    /// Compile a model and print its diagnostics
    Check {
        /// Model file (JSON)
        model: PathBuf,
    },
    /// Run evaluation cycles and print variable values
    Run {
        /// Model file (JSON)
        model: PathBuf,
        /// Number of cycles (overrides efs.toml)
        #[arg(long)]
        cycles: Option<u64>,
        /// Configuration file (default: efs.toml in the current directory or above)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Parse { text, statement } => commands::parse::run(&text, statement),
        Commands::Check { model } => commands::check::run(&model),
        Commands::Run {
            model,
            cycles,
            config: config_path,
            json,
        } => {
            let cwd = std::env::current_dir()?;
            let mut config = config::EfsConfig::load(config_path.as_deref(), &cwd)?;
            if let Some(cycles) = cycles {
                config.engine.cycles = cycles;
            }
            commands::run::run(&model, config.engine, json)
        }
    }
}
