//! Codebase tools: read the project, modify the writable subtree, hot-load extensions

use serde_json::Value;

use crate::error::ToolError;
use crate::tools::{required_str, ParameterProperty, ParameterSchema, SecurityLevel, Tool, ToolContext};

pub struct CodeReadTool;

impl Tool for CodeReadTool {
    fn name(&self) -> &str {
        "code_read"
    }

    fn description(&self) -> &str {
        "Read any file in the project by relative path"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "path",
            ParameterProperty::string("Relative path to the file, e.g. 'Cargo.toml' or 'extensions/util.wat'"),
        )
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        ctx.codebase.read_file(required_str(args, "path")?)
    }
}

pub struct CodeWriteTool;

impl Tool for CodeWriteTool {
    fn name(&self) -> &str {
        "code_write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the writable extensions directory. Protected files cannot be modified."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "path",
                ParameterProperty::string("Relative path inside the extensions directory, e.g. 'extensions/util.wat'"),
            )
            .with_required("content", ParameterProperty::string("The file content to write"))
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let path = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        ctx.codebase.write_file(path, content)
    }
}

pub struct CodeDeleteTool;

impl Tool for CodeDeleteTool {
    fn name(&self) -> &str {
        "code_delete"
    }

    fn description(&self) -> &str {
        "Delete a file from the writable extensions directory. Protected files cannot be deleted."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "path",
            ParameterProperty::string("Relative path to delete, e.g. 'extensions/old.wat'"),
        )
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        ctx.codebase.delete_file(required_str(args, "path")?)
    }
}

pub struct CodeListTool;

impl Tool for CodeListTool {
    fn name(&self) -> &str {
        "code_list"
    }

    fn description(&self) -> &str {
        "List all files in the project with their kind (protected/writable/other) and size"
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Safe
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    fn execute(&self, _args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        let files = ctx.codebase.list_files();
        serde_json::to_string_pretty(&files).map_err(|e| ToolError::InvalidArgument(e.to_string()))
    }
}

pub struct CodeExecTool;

impl Tool for CodeExecTool {
    fn name(&self) -> &str {
        "code_exec"
    }

    fn description(&self) -> &str {
        "Hot-load a WebAssembly module (.wat or .wasm) from the extensions directory into the sandbox. \
         Modules may only import from the allowed host namespaces (math, math.trig, text)."
    }

    fn security_level(&self) -> SecurityLevel {
        SecurityLevel::Dangerous
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "path",
            ParameterProperty::string("Relative path to the module, e.g. 'extensions/util.wat'"),
        )
    }

    fn execute(&self, args: &Value, ctx: &mut ToolContext<'_>) -> Result<String, ToolError> {
        ctx.codebase.hot_load(required_str(args, "path")?)
    }
}
