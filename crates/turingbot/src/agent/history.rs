//! Conversation history with a pinned system message

use llm_core::{ChatMessage, Role};

/// Ordered chat history. When present, element 0 is the system message.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<ChatMessage>,
    max_messages: usize,
}

impl History {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(2),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn has_system(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::System)
    }

    /// Insert the system message at the front, or overwrite the existing one
    pub fn set_system(&mut self, prompt: &str) {
        if self.has_system() {
            self.messages[0].content = prompt.to_string();
        } else {
            self.messages.insert(0, ChatMessage::system(prompt));
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Drop the oldest messages after element 0 until within the limit
    pub fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(1..1 + excess);
        }
    }

    /// Keep only the system message
    pub fn clear(&mut self) {
        let keep = usize::from(self.has_system());
        self.messages.truncate(keep);
    }
}
