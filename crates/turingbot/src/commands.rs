//! CLI commands implementation

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use llm_core::OllamaStatus;

use crate::agent::{Dispatcher, ReasoningBackend};
use crate::codebase::{CapabilityStore, FileKind};
use crate::config::{RuntimeConfig, CONFIG_FILE};
use crate::runtime::{Agent, LogSink};
use crate::sandbox::Sandbox;
use crate::scheduler::Scheduler;
use crate::spatial::SpatialStore;
use crate::tools::builtin::create_default_registry;
use crate::tools::router::ToolRouter;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Author used for stdin lines without an `author:` prefix
const DEFAULT_AUTHOR: &str = "user";

/// Stdin line that forgets the conversation instead of interrupting
const CLEAR_COMMAND: &str = "/clear";

fn open_store(config: &RuntimeConfig) -> Result<CapabilityStore> {
    let sandbox = Sandbox::new(config.sandbox.clone()).context("Failed to create sandbox")?;
    CapabilityStore::new(&config.project_root(), config.protection_policy(), sandbox)
}

/// Split `author: message`; lines without a usable prefix come from the default author
fn parse_interrupt(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((author, message))
            if !author.trim().is_empty()
                && !author.trim().contains(char::is_whitespace)
                && !message.trim().is_empty() =>
        {
            (author.trim(), message.trim())
        }
        _ => (DEFAULT_AUTHOR, line.trim()),
    }
}

/// Start the heartbeat and answer stdin lines until EOF or Ctrl-C
pub async fn run(config_path: Option<&Path>, model: Option<String>, interval: Option<f64>) -> Result<()> {
    let mut config = RuntimeConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(model) = model {
        config.ollama.model = model;
    }
    if let Some(interval) = interval {
        config.heartbeat.interval_secs = interval;
    }
    config.validate()?;

    let client = config.ollama.client();
    if client.status().await == OllamaStatus::Stopped {
        warn!(url = %client.base_url(), "Ollama is not reachable; ticks will fail until it is");
    }
    let backend: Arc<dyn ReasoningBackend> = Arc::new(client);

    let codebase = open_store(&config)?;
    let tape_path = config.tape_path();
    let spatial = SpatialStore::load(&tape_path)?;
    info!(
        root = %codebase.root().display(),
        tape = %tape_path.display(),
        cells = spatial.len(),
        "Loaded state"
    );

    let dispatcher = Dispatcher::new(
        backend,
        config.ollama.model.clone(),
        config.history.max_messages,
        ToolRouter::new(create_default_registry()),
        spatial,
        codebase,
    );
    let agent = Arc::new(Agent::new(dispatcher, tape_path, Arc::new(LogSink)));
    let scheduler = Scheduler::new(config.interval(), agent.clone());
    scheduler.start()?;

    println!(
        "{}turingbot{} running {} every {:?}. Type a message, `name: message`, or {}.",
        BOLD,
        RESET,
        config.ollama.model,
        scheduler.interval(),
        CLEAR_COMMAND
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if line.trim() == CLEAR_COMMAND {
            agent.clear_history().await;
            println!("{}History cleared{}", DIM, RESET);
            continue;
        }

        let (author, message) = parse_interrupt(&line);
        match agent.interrupt(&scheduler, author, message).await {
            Ok(response) => {
                for record in &response.tool_log {
                    println!("{}  {} {}{}", DIM, record.tool, record.arguments, RESET);
                }
                println!("{}", response.text);
            }
            Err(e) => println!("{}error:{} {:#}", RED, RESET, e),
        }
    }

    scheduler.stop();
    scheduler.join().await;
    agent.save().await?;
    println!("{}", agent.status().await);
    Ok(())
}

/// Print the persisted tape
pub fn status(config_path: Option<&Path>) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let tape_path = config.tape_path();
    let tape = SpatialStore::load(&tape_path)?;

    println!("{}Tape{} {}", BOLD, RESET, tape_path.display());
    println!("{}", tape.status());
    Ok(())
}

/// List the project tree with protection markers
pub fn files(config_path: Option<&Path>) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let store = open_store(&config)?;

    println!("{}Project{} {}", BOLD, RESET, store.root().display());
    for entry in store.list_files() {
        let color = match entry.kind {
            FileKind::Protected => RED,
            FileKind::Writable => GREEN,
            FileKind::Other => DIM,
        };
        println!(
            "  {}{:<9}{} {} ({} bytes)",
            color, entry.kind, RESET, entry.path, entry.size
        );
    }
    Ok(())
}

/// Hot-load one extension and print its namespace
pub fn load(config_path: Option<&Path>, path: &str) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let mut store = open_store(&config)?;

    match store.hot_load(path) {
        Ok(message) => println!("{}", message),
        Err(e) => {
            println!("{}{}{}", RED, e.tagged(), RESET);
            return Ok(());
        }
    }

    for id in store.loaded_modules() {
        if let Some(module) = store.module(id) {
            println!("{}{}{}", BOLD, module.name(), RESET);
            if module.namespace().is_empty() {
                println!("  {}(nothing defined){}", YELLOW, RESET);
            }
            for (name, binding) in module.namespace() {
                println!("  {} = {}", name, binding);
            }
        }
    }
    Ok(())
}

/// Write a default config in the current directory
pub fn init() -> Result<()> {
    let path = std::env::current_dir()?.join(CONFIG_FILE);
    RuntimeConfig::create_default(&path)?;
    println!("{}✓{} Created {}", GREEN, RESET, path.display());
    Ok(())
}
