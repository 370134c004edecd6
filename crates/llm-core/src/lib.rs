//! llm-core: Ollama client for the turingbot runtime
//!
//! Provides:
//! - Connection settings (`[ollama]` config section)
//! - Chat API client with tool calling
//! - Wire types for messages, tool calls and tool definitions

pub mod config;
pub mod ollama;

pub use config::OllamaConfig;
pub use ollama::{
    ChatMessage, ChatOptions, ChatResponse, FunctionCall, FunctionDefinition, OllamaClient,
    OllamaStatus, Role, ToolCall, ToolDefinition,
};
