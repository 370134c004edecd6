//! turingbot: autonomous heartbeat agent
//!
//! Runs a local model on a fixed heartbeat, gives it a persistent 3D tape and
//! lets it extend itself with sandboxed WebAssembly modules. Lines on stdin
//! interrupt the heartbeat as messages from a human.

mod agent;
mod codebase;
mod commands;
mod config;
mod error;
mod prompt;
mod runtime;
mod sandbox;
mod scheduler;
mod spatial;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "turingbot")]
#[command(about = "Autonomous heartbeat agent with a 3D tape", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: search for turingbot.toml)
    #[arg(short, long, global = true, env = "TURINGBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the heartbeat and read interrupts from stdin
    Run {
        /// Model to use (overrides config)
        #[arg(short, long, env = "TURINGBOT_MODEL")]
        model: Option<String>,

        /// Seconds between ticks (overrides config)
        #[arg(short, long, env = "TURINGBOT_INTERVAL")]
        interval: Option<f64>,
    },

    /// Show the persisted tape
    Status,

    /// List project files and whether they can be modified
    Files,

    /// Hot-load one extension and show what it defines
    Load {
        /// Path relative to the project root
        path: String,
    },

    /// Write a default turingbot.toml in the current directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run { model, interval } => commands::run(config, model, interval).await,
        Commands::Status => commands::status(config),
        Commands::Files => commands::files(config),
        Commands::Load { path } => commands::load(config, &path),
        Commands::Init => commands::init(),
    }
}
