//! Runtime configuration
//!
//! Configuration file: `turingbot.toml`, found in the current directory or a
//! parent, falling back to the user config directory. Relative paths in the
//! file are resolved against the directory the file was found in.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use llm_core::OllamaConfig;

use crate::codebase::ProtectionPolicy;
use crate::sandbox::SandboxPolicy;

pub const CONFIG_FILE: &str = "turingbot.toml";

/// How many parent directories to search for the config file
const SEARCH_DEPTH: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub codebase: CodebaseConfig,

    #[serde(default)]
    pub sandbox: SandboxPolicy,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between the end of one tick and the start of the next
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages kept in the conversation, including the system message
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseConfig {
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// The only subtree the agent may modify, relative to the project root
    #[serde(default = "default_writable_dir")]
    pub writable_dir: PathBuf,

    /// Tape persistence file, relative to the project root
    #[serde(default = "default_tape_state")]
    pub tape_state: PathBuf,

    /// Leaf file names that can never be modified
    #[serde(default = "default_protected")]
    pub protected: Vec<String>,
}

fn default_interval_secs() -> f64 {
    10.0
}

fn default_max_messages() -> usize {
    50
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_writable_dir() -> PathBuf {
    PathBuf::from("extensions")
}

fn default_tape_state() -> PathBuf {
    PathBuf::from("tape_state.json")
}

fn default_protected() -> Vec<String> {
    [
        "Cargo.toml",
        "Cargo.lock",
        CONFIG_FILE,
        "main.rs",
        "lib.rs",
        "mod.rs",
        "tape_state.json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

impl Default for CodebaseConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            writable_dir: default_writable_dir(),
            tape_state: default_tape_state(),
            protected: default_protected(),
        }
    }
}

impl RuntimeConfig {
    /// Load from an explicit path, or search for `turingbot.toml`; defaults when none is found
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match Self::find_config_path() {
                Some(path) => Self::load_from(&path)?,
                None => Self {
                    base_dir: std::env::current_dir()?,
                    ..Default::default()
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

        config.base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        Ok(config)
    }

    /// Find turingbot.toml in the current directory or its parents, then the user config dir
    pub fn find_config_path() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        Self::search_upward(&cwd).or_else(|| {
            let user = dirs::config_dir()?.join("turingbot").join(CONFIG_FILE);
            user.exists().then_some(user)
        })
    }

    fn search_upward(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        for _ in 0..SEARCH_DEPTH {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    /// Reject configurations the runtime cannot start with
    pub fn validate(&self) -> Result<()> {
        let interval = self.heartbeat.interval_secs;
        if !Duration::try_from_secs_f64(interval).is_ok_and(|d| !d.is_zero()) {
            bail!("heartbeat.interval_secs must be a positive number of seconds, got {}", interval);
        }
        if self.history.max_messages < 2 {
            bail!(
                "history.max_messages must be at least 2, got {}",
                self.history.max_messages
            );
        }

        let writable = &self.codebase.writable_dir;
        if writable.as_os_str().is_empty()
            || writable.is_absolute()
            || writable
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir))
        {
            bail!(
                "codebase.writable_dir must be a relative path without '..', got '{}'",
                writable.display()
            );
        }
        if self.sandbox.allowed_modules.is_empty() {
            bail!("sandbox.allowed_modules must not be empty");
        }
        Ok(())
    }

    /// Falls back to the default for values [`RuntimeConfig::validate`] rejects
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.heartbeat.interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_interval_secs()))
    }

    pub fn project_root(&self) -> PathBuf {
        self.base_dir.join(&self.codebase.project_root)
    }

    pub fn tape_path(&self) -> PathBuf {
        self.project_root().join(&self.codebase.tape_state)
    }

    pub fn protection_policy(&self) -> ProtectionPolicy {
        ProtectionPolicy {
            protected: self.codebase.protected.iter().cloned().collect::<BTreeSet<_>>(),
            writable_dir: self.codebase.writable_dir.clone(),
        }
    }

    /// Write a commented default configuration file
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists: {}", path.display());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, DEFAULT_CONFIG).with_context(|| format!("Failed to write {}", path.display()))
    }
}

const DEFAULT_CONFIG: &str = r#"# turingbot configuration

[ollama]
host = "127.0.0.1"
port = 11434
model = "qwen3:32b"
# temperature = 0.7

[heartbeat]
# Seconds between autonomous ticks
interval_secs = 10.0

[history]
# Messages kept in the conversation, including the system prompt
max_messages = 50

[codebase]
project_root = "."
# The only directory the agent may write to
writable_dir = "extensions"
tape_state = "tape_state.json"
protected = ["Cargo.toml", "Cargo.lock", "turingbot.toml", "main.rs", "lib.rs", "mod.rs", "tape_state.json"]

[sandbox]
allowed_modules = ["math", "text", "json", "base64", "collections"]
denied_operations = ["exec", "eval", "spawn", "open", "system", "exit"]
"#;
