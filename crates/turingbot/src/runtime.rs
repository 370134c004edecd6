//! Shared agent core driven by both the heartbeat and interrupts

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::agent::{Dispatcher, Response};
use crate::prompt;
use crate::scheduler::{Scheduler, TickHandler};
use crate::tools::ToolCallRecord;

/// What prompted a thought
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThoughtSource {
    Tick { n: u64 },
    Interrupt { author: String },
}

/// One completed reasoning round-trip, as published to the result sink
#[derive(Debug, Clone, Serialize)]
pub struct Thought {
    pub source: ThoughtSource,
    pub text: String,
    pub tool_log: Vec<ToolCallRecord>,
}

/// Where thoughts from ticks and interrupts are published
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, thought: &Thought) -> Result<()>;
}

/// Publishes thoughts to the structured log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn deliver(&self, thought: &Thought) -> Result<()> {
        for record in &thought.tool_log {
            info!(
                tool = %record.tool,
                args = %record.arguments,
                result = %record.result,
                "Thought tool call"
            );
        }
        match &thought.source {
            ThoughtSource::Tick { n } => info!(tick = n, text = %thought.text, "Heartbeat thought"),
            ThoughtSource::Interrupt { author } => {
                info!(author = %author, text = %thought.text, "Interrupt reply")
            }
        }
        Ok(())
    }
}

/// The dispatcher plus persistence and publishing
pub struct Agent {
    dispatcher: Mutex<Dispatcher>,
    tape_path: PathBuf,
    sink: Arc<dyn ResultSink>,
}

impl Agent {
    pub fn new(dispatcher: Dispatcher, tape_path: PathBuf, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            dispatcher: Mutex::new(dispatcher),
            tape_path,
            sink,
        }
    }

    /// Respond, persist the tape, then publish
    async fn think(&self, source: ThoughtSource, input: &str) -> Result<Response> {
        let mut dispatcher = self.dispatcher.lock().await;
        let system = {
            let d = &*dispatcher;
            debug!(model = d.model(), history = d.history().len(), source = ?source, "Thinking");
            prompt::system_prompt(d.codebase(), d.router().registry())
        };

        let response = dispatcher.respond(&system, input).await?;
        dispatcher
            .spatial()
            .save(&self.tape_path)
            .context("Failed to persist tape")?;
        drop(dispatcher);

        let thought = Thought {
            source,
            text: response.text.clone(),
            tool_log: response.tool_log.clone(),
        };
        self.sink.deliver(&thought).await.context("Failed to deliver thought")?;
        Ok(response)
    }

    /// Answer a human message with the heartbeat held paused for the whole exchange
    #[instrument(skip(self, scheduler, message), fields(author = %author))]
    pub async fn interrupt(&self, scheduler: &Scheduler, author: &str, message: &str) -> Result<Response> {
        let _pause = scheduler.pause_guard();
        info!("Heartbeat paused for interrupt");
        let input = prompt::interrupt_prompt(author, message);
        self.think(
            ThoughtSource::Interrupt {
                author: author.to_string(),
            },
            &input,
        )
        .await
    }

    /// Persist the tape outside of a thought, e.g. at shutdown
    pub async fn save(&self) -> Result<()> {
        let dispatcher = self.dispatcher.lock().await;
        dispatcher.spatial().save(&self.tape_path)
    }

    /// Forget the conversation; the tape and loaded modules stay
    pub async fn clear_history(&self) {
        self.dispatcher.lock().await.clear_history();
        info!("History cleared");
    }

    pub async fn status(&self) -> String {
        self.dispatcher.lock().await.spatial().status()
    }
}

#[async_trait]
impl TickHandler for Agent {
    async fn tick(&self, n: u64) -> Result<()> {
        let input = prompt::heartbeat_prompt(n);
        self.think(ThoughtSource::Tick { n }, &input).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ReasoningBackend;
    use crate::codebase::{CapabilityStore, ProtectionPolicy};
    use crate::sandbox::{Sandbox, SandboxPolicy};
    use crate::scheduler::SchedulerState;
    use crate::spatial::SpatialStore;
    use crate::tools::builtin::create_default_registry;
    use crate::tools::router::ToolRouter;
    use llm_core::{ChatMessage, ToolCall, ToolDefinition};
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Writes the last user message's first word to the tape, then answers
    struct EchoBackend;

    #[async_trait]
    impl ReasoningBackend for EchoBackend {
        async fn complete(&self, _model: &str, history: &[ChatMessage], _tools: &[ToolDefinition]) -> Result<ChatMessage> {
            let last = history.last().unwrap();
            if last.role == llm_core::Role::Tool {
                return Ok(ChatMessage::assistant("noted"));
            }
            let word = last.content.split_whitespace().next().unwrap_or("").to_string();
            Ok(ChatMessage::assistant_with_tools(
                "",
                vec![ToolCall::new("tape_write", json!({ "value": word }))],
            ))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        thoughts: SyncMutex<Vec<Thought>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn deliver(&self, thought: &Thought) -> Result<()> {
            self.thoughts.lock().push(thought.clone());
            Ok(())
        }
    }

    fn agent(dir: &TempDir, sink: Arc<dyn ResultSink>) -> Agent {
        let policy = ProtectionPolicy {
            protected: Default::default(),
            writable_dir: "extensions".into(),
        };
        let sandbox = Sandbox::new(SandboxPolicy::default()).unwrap();
        let codebase = CapabilityStore::new(dir.path(), policy, sandbox).unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(EchoBackend),
            "m",
            50,
            ToolRouter::new(create_default_registry()),
            SpatialStore::new(),
            codebase,
        );
        Agent::new(dispatcher, dir.path().join("state/tape.json"), sink)
    }

    #[tokio::test]
    async fn test_tick_delivers_and_persists() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let agent = agent(&dir, sink.clone());

        agent.tick(1).await.unwrap();

        let thoughts = sink.thoughts.lock();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].source, ThoughtSource::Tick { n: 1 });
        assert_eq!(thoughts[0].text, "noted");
        assert_eq!(thoughts[0].tool_log[0].arguments, json!({"value": "[HEARTBEAT"}));

        let saved = SpatialStore::load(&dir.path().join("state/tape.json")).unwrap();
        assert_eq!(saved.read(), "[HEARTBEAT");
    }

    #[tokio::test]
    async fn test_interrupt_pauses_and_resumes() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let agent = Arc::new(agent(&dir, sink.clone()));

        let scheduler = Scheduler::new(Duration::from_secs(3600), agent.clone());
        scheduler.start().unwrap();

        let response = agent.interrupt(&scheduler, "ada", "hello").await.unwrap();
        assert_eq!(response.text, "noted");
        assert_eq!(scheduler.state(), SchedulerState::Active);

        let thoughts = sink.thoughts.lock().clone();
        let last = thoughts.last().unwrap();
        assert_eq!(last.source, ThoughtSource::Interrupt { author: "ada".to_string() });
        assert_eq!(last.tool_log[0].arguments, json!({"value": "[INTERRUPT]"}));

        scheduler.stop();
        scheduler.join().await;
    }

    #[tokio::test]
    async fn test_interrupt_failure_still_resumes() {
        struct DownBackend;

        #[async_trait]
        impl ReasoningBackend for DownBackend {
            async fn complete(&self, _: &str, _: &[ChatMessage], _: &[ToolDefinition]) -> Result<ChatMessage> {
                anyhow::bail!("connection refused")
            }
        }

        let dir = TempDir::new().unwrap();
        let policy = ProtectionPolicy {
            protected: Default::default(),
            writable_dir: "extensions".into(),
        };
        let codebase =
            CapabilityStore::new(dir.path(), policy, Sandbox::new(SandboxPolicy::default()).unwrap()).unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(DownBackend),
            "m",
            50,
            ToolRouter::new(create_default_registry()),
            SpatialStore::new(),
            codebase,
        );
        let agent = Agent::new(dispatcher, dir.path().join("tape.json"), Arc::new(LogSink));
        let scheduler = Scheduler::new(Duration::from_secs(3600), Arc::new(IdleHandler));

        assert!(agent.interrupt(&scheduler, "bob", "hi").await.is_err());
        assert!(!scheduler.is_paused());
    }

    #[tokio::test]
    async fn test_tape_persisted_when_delivery_fails() {
        struct ClosedSink;

        #[async_trait]
        impl ResultSink for ClosedSink {
            async fn deliver(&self, _thought: &Thought) -> Result<()> {
                anyhow::bail!("sink closed")
            }
        }

        let dir = TempDir::new().unwrap();
        let agent = agent(&dir, Arc::new(ClosedSink));

        let err = agent.tick(3).await.unwrap_err();
        assert!(format!("{:#}", err).contains("sink closed"));

        let saved = SpatialStore::load(&dir.path().join("state/tape.json")).unwrap();
        assert_eq!(saved.read(), "[HEARTBEAT");
    }

    #[tokio::test]
    async fn test_clear_history_keeps_tape() {
        let dir = TempDir::new().unwrap();
        let agent = agent(&dir, Arc::new(RecordingSink::default()));

        agent.tick(1).await.unwrap();
        assert!(agent.dispatcher.lock().await.history().len() > 1);

        agent.clear_history().await;
        assert_eq!(agent.dispatcher.lock().await.history().len(), 1);
        assert!(agent.status().await.contains("[HEARTBEAT"));
    }

    struct IdleHandler;

    #[async_trait]
    impl TickHandler for IdleHandler {
        async fn tick(&self, _n: u64) -> Result<()> {
            Ok(())
        }
    }
}
