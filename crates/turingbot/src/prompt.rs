//! Prompt text for the system message, heartbeat ticks and interrupts

use std::fmt::Write;

use crate::codebase::{CapabilityStore, FileKind};
use crate::sandbox::LIBRARIES;
use crate::tools::registry::ToolRegistry;

/// Extension sources longer than this are cut in the system prompt
const MAX_INLINE_SOURCE: usize = 8_000;

/// Build the system prompt from the live project tree and tool set
pub fn system_prompt(codebase: &CapabilityStore, tools: &ToolRegistry) -> String {
    let writable = codebase.policy().writable_dir.display().to_string();
    let files = codebase.list_files();

    let mut listing = String::new();
    for file in &files {
        let marker = match file.kind {
            FileKind::Protected => "[PROTECTED]",
            FileKind::Writable => "[WRITABLE]",
            FileKind::Other => "[READ-ONLY]",
        };
        let _ = writeln!(listing, "- {} {} ({} bytes)", file.path, marker, file.size);
    }
    if listing.is_empty() {
        listing.push_str("(no files found)\n");
    }

    let mut extensions = String::new();
    for file in files.iter().filter(|f| f.kind == FileKind::Writable && f.path.ends_with(".wat")) {
        let source = codebase
            .read_file(&file.path)
            .unwrap_or_else(|e| format!("[error reading file: {}]", e));
        let source = if source.chars().count() > MAX_INLINE_SOURCE {
            let head: String = source.chars().take(MAX_INLINE_SOURCE).collect();
            format!("{}\n;; ... truncated", head)
        } else {
            source
        };
        let _ = write!(extensions, "### {}\n```wat\n{}\n```\n\n", file.path, source);
    }
    if extensions.is_empty() {
        extensions.push_str("(no extensions yet)\n");
    }

    let loaded = codebase.loaded_modules();
    let loaded = if loaded.is_empty() {
        "(none)".to_string()
    } else {
        loaded.join(", ")
    };

    let mut tool_table = String::from("| Tool | Level | Description |\n|------|-------|-------------|\n");
    for tool in tools.tools() {
        let _ = writeln!(
            tool_table,
            "| `{}` | {} | {} |",
            tool.name(),
            tool.security_level(),
            tool.description()
        );
    }

    let sandbox = codebase.sandbox_policy();
    let mut host = String::new();
    for (module, ops) in LIBRARIES.iter().filter(|(m, _)| sandbox.is_module_allowed(m)) {
        let ops: Vec<&str> = ops
            .iter()
            .copied()
            .filter(|op| !sandbox.is_operation_denied(op))
            .collect();
        let _ = writeln!(host, "- `{}`: {}", module, ops.join(", "));
    }
    if host.is_empty() {
        host.push_str("(none)\n");
    }

    format!(
        "\
# YOU ARE AN AUTONOMOUS 3D TURING MACHINE

You run on a continuous heartbeat. Every tick you may think, compute, use your
tape, write extensions, or simply reflect. When a human sends you a message the
heartbeat pauses, you answer them, and the heartbeat resumes.

## PROJECT FILES

{listing}
## YOUR EXTENSIONS

{extensions}Loaded modules: {loaded}

## 3D TAPE

A sparse, unbounded 3D grid of string cells with a cursor you move around. The
tape is your working memory and persists across restarts.

## TOOLS

{tool_table}
`safe` tools only read. `moderate` tools change the tape. `dangerous` tools
write files or run extension code, so prefer a safe tool when one will do.

## EXTENSIONS

You can only write inside `{writable}/`. Extensions are WebAssembly modules
(`.wat` text or `.wasm` binary) loaded with `code_exec`. A module runs its start
function on load and its exported globals and functions are reported back. It
may only import from these host namespaces:

{host}
Functions outside `math` take (pointer, length) pairs into the module's own
memory, which must be exported as \"memory\". `base64` writes its output at a
destination pointer and returns the byte count; `collections` works on arrays
of little-endian i64 values given as (pointer, count). Anything else is blocked.

## RULES

1. You are autonomous. Use heartbeat time however you see fit.
2. When humans message you, answer them directly.
3. You can read every file. You can only modify files inside `{writable}/`, and
   protected names can never be modified.
4. Tool errors come back as results tagged like `[capability violation]`,
   `[not found]`, `[outside root]` or `[error: Category]`.
"
    )
}

/// Input for an autonomous tick
pub fn heartbeat_prompt(tick: u64) -> String {
    format!(
        "[HEARTBEAT {}] This is your autonomous heartbeat tick. You are free to think, \
         compute, explore your tape, write extensions, or simply reflect. \
         Use your tools if needed.",
        tick
    )
}

/// Input for a human interrupt
pub fn interrupt_prompt(author: &str, message: &str) -> String {
    format!(
        "[INTERRUPT] A human '{}' sent you a message:\n\n{}\n\n\
         Respond to them directly. After your response, your heartbeat will resume.",
        author, message
    )
}
