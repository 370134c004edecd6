//! Built-in tools

mod code;
mod tape;

pub use code::{CodeDeleteTool, CodeExecTool, CodeListTool, CodeReadTool, CodeWriteTool};
pub use tape::{TapeJumpTool, TapeMoveTool, TapeReadTool, TapeScanTool, TapeStatusTool, TapeWriteTool};

use super::registry::ToolRegistry;

/// Create a registry with every tape and codebase tool
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Safe tools (read-only)
    registry.register(TapeReadTool);
    registry.register(TapeScanTool);
    registry.register(TapeStatusTool);
    registry.register(CodeReadTool);
    registry.register(CodeListTool);

    // Moderate tools (tape mutation)
    registry.register(TapeWriteTool);
    registry.register(TapeMoveTool);
    registry.register(TapeJumpTool);

    // Dangerous tools (file writes, extension execution)
    registry.register(CodeWriteTool);
    registry.register(CodeDeleteTool);
    registry.register(CodeExecTool);

    registry
}
