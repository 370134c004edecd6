//! Tool routing and dispatch

use serde_json::Value;
use tracing::{debug, info, warn};

use llm_core::ToolDefinition;

use super::registry::ToolRegistry;
use super::ToolContext;
use crate::error::ToolError;

/// Result of routing a tool call
#[derive(Debug)]
pub enum RouteResult {
    Success(String),
    /// No tool with this name is registered
    NotFound(String),
    Failed(ToolError),
}

impl RouteResult {
    /// The text fed back to the model as the tool result
    pub fn into_text(self) -> String {
        match self {
            RouteResult::Success(output) => output,
            RouteResult::NotFound(name) => format!("unknown tool: {}", name),
            RouteResult::Failed(e) => e.tagged(),
        }
    }
}

/// Router for dispatching tool calls
pub struct ToolRouter {
    registry: ToolRegistry,
}

impl ToolRouter {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Route a single tool call. Never fails: faults are carried in the result.
    pub fn route(&self, name: &str, args: &Value, ctx: &mut ToolContext<'_>) -> RouteResult {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = %name, "Tool not found");
            return RouteResult::NotFound(name.to_string());
        };

        debug!(tool = %name, security_level = %tool.security_level(), "Executing tool");
        match tool.execute(args, ctx) {
            Ok(output) => {
                info!(tool = %name, output_len = output.len(), "Tool executed successfully");
                RouteResult::Success(output)
            }
            Err(e) => {
                warn!(tool = %name, kind = ?e.kind(), error = %e, "Tool execution failed");
                RouteResult::Failed(e)
            }
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codebase::{CapabilityStore, ProtectionPolicy};
    use crate::sandbox::{Sandbox, SandboxPolicy};
    use crate::spatial::SpatialStore;
    use crate::tools::{ParameterSchema, SecurityLevel, Tool};
    use serde_json::json;
    use tempfile::TempDir;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes input"
        }

        fn security_level(&self) -> SecurityLevel {
            SecurityLevel::Safe
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        fn execute(&self, args: &Value, _ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => Ok(text.to_string()),
                None => Err(ToolError::missing("text")),
            }
        }
    }

    fn codebase(dir: &TempDir) -> CapabilityStore {
        let policy = ProtectionPolicy {
            protected: Default::default(),
            writable_dir: "extensions".into(),
        };
        CapabilityStore::new(dir.path(), policy, Sandbox::new(SandboxPolicy::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_router_results() {
        let temp_dir = TempDir::new().unwrap();
        let mut spatial = SpatialStore::new();
        let mut codebase = codebase(&temp_dir);
        let mut ctx = ToolContext {
            spatial: &mut spatial,
            codebase: &mut codebase,
        };

        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let router = ToolRouter::new(registry);

        let ok = router.route("echo", &json!({"text": "hello"}), &mut ctx);
        assert!(matches!(&ok, RouteResult::Success(text) if text == "hello"));
        assert_eq!(ok.into_text(), "hello");

        let failed = router.route("echo", &json!({}), &mut ctx);
        assert_eq!(
            failed.into_text(),
            "[error: InvalidArgument] missing required parameter: text"
        );

        let missing = router.route("teleport", &json!({}), &mut ctx);
        assert_eq!(missing.into_text(), "unknown tool: teleport");
    }
}
