//! Name-keyed tool table

use std::collections::BTreeMap;

use llm_core::ToolDefinition;

use super::{SecurityLevel, Tool};

/// Tools the dispatcher can offer the backend. Iteration is in name order so
/// the definitions sent each round and the prompt table are stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; a later tool with the same name replaces the earlier one
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| &**tool)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &dyn Tool> + '_ {
        self.tools.values().map(|tool| &**tool)
    }

    /// Names of the tools at one security level
    pub fn names_at(&self, level: SecurityLevel) -> Vec<&str> {
        self.tools()
            .filter(|tool| tool.security_level() == level)
            .map(|tool| tool.name())
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools().map(|tool| tool.to_definition()).collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
