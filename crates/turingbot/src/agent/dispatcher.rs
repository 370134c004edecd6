//! Bounded tool-calling dispatch for one reasoning round-trip

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use llm_core::ChatMessage;

use super::backend::ReasoningBackend;
use super::history::History;
use crate::codebase::CapabilityStore;
use crate::error::ToolError;
use crate::spatial::SpatialStore;
use crate::tools::router::{RouteResult, ToolRouter};
use crate::tools::{ToolCallRecord, ToolContext};

/// Maximum backend round-trips per `respond`
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Text returned when every round ended in more tool calls
pub const EXHAUSTED_SENTINEL: &str = "(max tool-call depth reached)";

/// Characters of a tool result shown in the log line
const LOG_PREVIEW_CHARS: usize = 200;

/// Outcome of one `respond`
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub text: String,
    pub tool_log: Vec<ToolCallRecord>,
    /// Backend round-trips used
    pub rounds: usize,
    /// True when the round limit was hit
    pub exhausted: bool,
}

/// Owns the conversation history and the stores the tools act on
pub struct Dispatcher {
    backend: Arc<dyn ReasoningBackend>,
    model: String,
    history: History,
    router: ToolRouter,
    spatial: SpatialStore,
    codebase: CapabilityStore,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        model: impl Into<String>,
        max_history: usize,
        router: ToolRouter,
        spatial: SpatialStore,
        codebase: CapabilityStore,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            history: History::new(max_history),
            router,
            spatial,
            codebase,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn router(&self) -> &ToolRouter {
        &self.router
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn spatial(&self) -> &SpatialStore {
        &self.spatial
    }

    pub fn codebase(&self) -> &CapabilityStore {
        &self.codebase
    }

    /// Drop everything except the system message
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Run one reasoning round-trip: refresh the system prompt, add `input` as a
    /// user turn, then alternate backend calls and tool execution until the
    /// backend answers without tool calls or the round limit is reached.
    ///
    /// Only a backend failure is an error; tool faults become tagged results.
    #[instrument(skip(self, system_prompt, input), fields(model = %self.model, input_len = input.len()))]
    pub async fn respond(&mut self, system_prompt: &str, input: &str) -> Result<Response> {
        self.history.set_system(system_prompt);
        self.history.push(ChatMessage::user(input));
        self.history.trim();

        let tools = self.router.tool_definitions();
        let mut tool_log = Vec::new();

        for round in 1..=MAX_TOOL_ROUNDS {
            debug!(round, messages = self.history.len(), "Calling reasoning backend");
            let reply = self
                .backend
                .complete(&self.model, self.history.messages(), &tools)
                .await
                .context("Reasoning backend request failed")?;

            if reply.tool_calls.is_empty() {
                let text = reply.content.clone();
                self.history.push(reply);
                info!(round, tool_calls = tool_log.len(), "Response complete");
                return Ok(Response {
                    text,
                    tool_log,
                    rounds: round,
                    exhausted: false,
                });
            }

            let calls = reply.tool_calls.clone();
            self.history.push(reply);
            debug!(round, tool_count = calls.len(), "Processing tool calls");

            for call in calls {
                let name = call.function.name;
                let (arguments, result) = match normalize_arguments(call.function.arguments) {
                    Ok(args) => {
                        info!(tool = %name, args = %args, "Tool call");
                        let result = self.execute_tool(&name, &args);
                        (args, result)
                    }
                    Err((raw, e)) => {
                        warn!(tool = %name, error = %e, "Malformed tool arguments");
                        (raw, e.tagged())
                    }
                };

                info!(tool = %name, result = %preview(&result), "Tool result");
                self.history.push(ChatMessage::tool_result(&name, &result));
                tool_log.push(ToolCallRecord {
                    tool: name,
                    arguments,
                    result,
                });
            }
        }

        warn!(rounds = MAX_TOOL_ROUNDS, tool_calls = tool_log.len(), "Tool-call depth exhausted");
        Ok(Response {
            text: EXHAUSTED_SENTINEL.to_string(),
            tool_log,
            rounds: MAX_TOOL_ROUNDS,
            exhausted: true,
        })
    }

    fn execute_tool(&mut self, name: &str, args: &Value) -> String {
        let mut ctx = ToolContext {
            spatial: &mut self.spatial,
            codebase: &mut self.codebase,
        };
        let result: RouteResult = self.router.route(name, args, &mut ctx);
        result.into_text()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("model", &self.model)
            .field("history", &self.history.len())
            .field("router", &self.router)
            .finish()
    }
}

/// Missing or null means no arguments; a JSON string holding an object is
/// accepted; anything else is rejected along with the raw payload.
fn normalize_arguments(raw: Value) -> Result<Value, (Value, ToolError)> {
    match raw {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(raw),
        Value::String(ref s) if s.trim().is_empty() => Ok(Value::Object(Map::new())),
        Value::String(ref s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            _ => {
                let err = ToolError::InvalidArgument(format!(
                    "tool arguments must be a JSON object, got string '{}'",
                    s
                ));
                Err((raw, err))
            }
        },
        other => {
            let err = ToolError::type_mismatch("arguments", "a JSON object", &other);
            Err((other, err))
        }
    }
}

fn preview(result: &str) -> String {
    if result.chars().count() > LOG_PREVIEW_CHARS {
        let head: String = result.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{}…", head)
    } else {
        result.to_string()
    }
}
