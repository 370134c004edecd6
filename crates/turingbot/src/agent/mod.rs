//! Reasoning round-trips against the backend

pub mod backend;
pub mod dispatcher;
pub mod history;

pub use backend::ReasoningBackend;
pub use dispatcher::{Dispatcher, Response, EXHAUSTED_SENTINEL, MAX_TOOL_ROUNDS};
pub use history::History;
