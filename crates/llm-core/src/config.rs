//! Connection settings for the Ollama server

use serde::{Deserialize, Serialize};

use crate::ollama::{ChatOptions, OllamaClient};

/// `[ollama]` section of the runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Model used for every chat turn
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_model() -> String {
    "qwen3:32b".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: default_model(),
            temperature: None,
        }
    }
}

impl OllamaConfig {
    /// Get Ollama base URL. A host that already carries a scheme is used verbatim.
    pub fn url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Build a client for this server
    pub fn client(&self) -> OllamaClient {
        let client = OllamaClient::new(self.url());
        match self.temperature {
            Some(temperature) => client.with_options(ChatOptions {
                temperature: Some(temperature),
                ..Default::default()
            }),
            None => client,
        }
    }
}
