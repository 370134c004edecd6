//! Reasoning backend abstraction

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use llm_core::{ChatMessage, OllamaClient, ToolDefinition};

/// A chat model that can request tool calls
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Send the full history plus tool schema and return the assistant message
    async fn complete(
        &self,
        model: &str,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage>;
}

#[async_trait]
impl ReasoningBackend for OllamaClient {
    async fn complete(
        &self,
        model: &str,
        history: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let response = self.chat(model, history, tools).await?;
        debug!(
            prompt_tokens = response.prompt_eval_count,
            completion_tokens = response.eval_count,
            tool_calls = response.message.tool_calls.len(),
            "Chat completed"
        );
        Ok(response.message)
    }
}
