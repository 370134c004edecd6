//! Restricted execution for self-written extensions
//!
//! Extensions are WebAssembly modules (`.wat` text or `.wasm` binary). A module
//! has no ambient authority: it can only reach what it imports, and every
//! import is checked against a [`SandboxPolicy`] before the module is
//! instantiated. The host only offers the pure namespaces in [`host`].
//!
//! There is no fuel or memory limit on execution.

mod host;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, instrument};
use wasmtime::{Engine, Extern, Instance, Linker, Module, Store, Val, ValType};

pub use host::LIBRARIES;

/// Allow/deny lists applied to each module's imports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Importable namespaces; dotted sub-namespaces of an entry are allowed too
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
    /// Operation names refused in every namespace
    #[serde(default = "default_denied_operations")]
    pub denied_operations: Vec<String>,
}

fn default_allowed_modules() -> Vec<String> {
    ["math", "text", "json", "base64", "collections"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_denied_operations() -> Vec<String> {
    ["exec", "eval", "spawn", "open", "system", "exit"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allowed_modules: default_allowed_modules(),
            denied_operations: default_denied_operations(),
        }
    }
}

impl SandboxPolicy {
    pub fn is_module_allowed(&self, module: &str) -> bool {
        self.allowed_modules.iter().any(|allowed| {
            module == allowed
                || module
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn is_operation_denied(&self, name: &str) -> bool {
        self.denied_operations.iter().any(|denied| denied == name)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("SANDBOX: import of module '{module}' is blocked. Allowed modules: {allowed:?}")]
    DisallowedModule { module: String, allowed: Vec<String> },

    #[error("SANDBOX: operation '{module}.{name}' is blocked by policy")]
    DisallowedOperation { module: String, name: String },

    #[error("SANDBOX: '{module}.{name}' is not provided by the host")]
    UnknownImport { module: String, name: String },

    /// Anything raised by the module itself: invalid source, traps, host function errors
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

impl SandboxError {
    pub fn is_capability_violation(&self) -> bool {
        matches!(
            self,
            SandboxError::DisallowedModule { .. } | SandboxError::DisallowedOperation { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            SandboxError::DisallowedModule { .. } => "DisallowedModule",
            SandboxError::DisallowedOperation { .. } => "DisallowedOperation",
            SandboxError::UnknownImport { .. } => "UnknownImport",
            SandboxError::Runtime(e) if e.downcast_ref::<wasmtime::Trap>().is_some() => "Trap",
            SandboxError::Runtime(_) => "RuntimeFault",
        }
    }
}

/// A top-level name defined by an extension
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Binding {
    Int(i64),
    Float(f64),
    /// Exported function, with its signature
    Function(String),
    /// Exported linear memory, in 64KiB pages
    Memory(u64),
    Table,
    Opaque,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Int(v) => write!(f, "{}", v),
            Binding::Float(v) => write!(f, "{}", v),
            Binding::Function(sig) => write!(f, "fn{}", sig),
            Binding::Memory(pages) => write!(f, "memory[{} pages]", pages),
            Binding::Table => write!(f, "table"),
            Binding::Opaque => write!(f, "opaque"),
        }
    }
}

pub type Namespace = BTreeMap<String, Binding>;

/// An instantiated extension. Keeps the instance alive for as long as it is registered.
pub struct LoadedModule {
    name: String,
    namespace: Namespace,
    #[allow(dead_code)]
    store: Store<()>,
    #[allow(dead_code)]
    instance: Instance,
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Defined top-level names, in order
    pub fn exports(&self) -> Vec<&str> {
        self.namespace.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// WebAssembly engine plus the host linker, shared by every execution
pub struct Sandbox {
    engine: Engine,
    linker: Linker<()>,
    policy: SandboxPolicy,
}

impl Sandbox {
    pub fn new(policy: SandboxPolicy) -> anyhow::Result<Self> {
        let engine = Engine::default();
        let mut linker = Linker::new(&engine);
        host::register(&mut linker)?;
        Ok(Self {
            engine,
            linker,
            policy,
        })
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Check every import of a compiled module against the policy
    fn check_imports(&self, module: &Module) -> Result<(), SandboxError> {
        for import in module.imports() {
            let (namespace, name) = (import.module(), import.name());
            if !self.policy.is_module_allowed(namespace) {
                return Err(SandboxError::DisallowedModule {
                    module: namespace.to_string(),
                    allowed: self.policy.allowed_modules.clone(),
                });
            }
            if self.policy.is_operation_denied(name) {
                return Err(SandboxError::DisallowedOperation {
                    module: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            if !host::provides(namespace, name) {
                return Err(SandboxError::UnknownImport {
                    module: namespace.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Compile, vet and instantiate `source`, running its start function.
    #[instrument(skip(self, source), fields(bytes = source.len()))]
    pub fn execute(&self, source: &[u8], module_name: &str) -> Result<LoadedModule, SandboxError> {
        let module = Module::new(&self.engine, source)?;
        self.check_imports(&module)?;

        let mut store = Store::new(&self.engine, ());
        let instance = self.linker.instantiate(&mut store, &module)?;
        debug!(module = module_name, "Instantiated extension");

        let mut namespace = Namespace::new();
        for export in module.exports() {
            let name = export.name();
            let Some(item) = instance.get_export(&mut store, name) else {
                continue;
            };
            namespace.insert(name.to_string(), binding_of(&mut store, item));
        }

        info!(module = module_name, exports = namespace.len(), "Extension executed in sandbox");
        Ok(LoadedModule {
            name: module_name.to_string(),
            namespace,
            store,
            instance,
        })
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox").field("policy", &self.policy).finish()
    }
}

fn binding_of(store: &mut Store<()>, item: Extern) -> Binding {
    match item {
        Extern::Global(global) => match global.get(&mut *store) {
            Val::I32(v) => Binding::Int(i64::from(v)),
            Val::I64(v) => Binding::Int(v),
            Val::F32(bits) => Binding::Float(f64::from(f32::from_bits(bits))),
            Val::F64(bits) => Binding::Float(f64::from_bits(bits)),
            _ => Binding::Opaque,
        },
        Extern::Func(func) => {
            let ty = func.ty(&*store);
            let params: Vec<&str> = ty.params().map(|t| type_name(&t)).collect();
            let results: Vec<&str> = ty.results().map(|t| type_name(&t)).collect();
            Binding::Function(format!("({}) -> ({})", params.join(", "), results.join(", ")))
        }
        Extern::Memory(memory) => Binding::Memory(memory.size(&*store)),
        Extern::Table(_) => Binding::Table,
        _ => Binding::Opaque,
    }
}

fn type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        _ => "ref",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxPolicy::default()).unwrap()
    }

    #[test]
    fn test_policy_submodules() {
        let policy = SandboxPolicy::default();
        assert!(policy.is_module_allowed("math"));
        assert!(policy.is_module_allowed("math.trig"));
        assert!(!policy.is_module_allowed("mathx"));
        assert!(!policy.is_module_allowed("wasi_snapshot_preview1"));
        assert!(policy.is_operation_denied("exec"));
        assert!(!policy.is_operation_denied("sqrt"));
    }

    #[test]
    fn test_disallowed_module_names_allowed_set() {
        let wat = r#"(module
            (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32))))"#;

        let err = sandbox().execute(wat.as_bytes(), "extensions.io").unwrap_err();
        assert!(err.is_capability_violation());
        let message = err.to_string();
        assert!(message.contains("wasi_snapshot_preview1"));
        assert!(message.contains("\"math\""));
        assert!(message.contains("\"text\""));
    }

    #[test]
    fn test_denied_operation() {
        let wat = r#"(module (import "math" "exec" (func)))"#;
        let err = sandbox().execute(wat.as_bytes(), "extensions.sneaky").unwrap_err();
        assert!(matches!(err, SandboxError::DisallowedOperation { ref name, .. } if name == "exec"));
        assert!(err.is_capability_violation());
    }

    #[test]
    fn test_unknown_import_in_allowed_module() {
        let wat = r#"(module (import "math" "teleport" (func)))"#;
        let err = sandbox().execute(wat.as_bytes(), "extensions.x").unwrap_err();
        assert!(matches!(err, SandboxError::UnknownImport { .. }));
        assert!(!err.is_capability_violation());
    }

    #[test]
    fn test_division_by_zero_propagates() {
        let wat = r#"(module
            (func $boom (drop (i32.div_s (i32.const 1) (i32.const 0))))
            (start $boom))"#;

        let err = sandbox().execute(wat.as_bytes(), "extensions.boom").unwrap_err();
        match err {
            SandboxError::Runtime(e) => {
                assert_eq!(
                    e.downcast_ref::<wasmtime::Trap>(),
                    Some(&wasmtime::Trap::IntegerDivisionByZero)
                );
            }
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_source_is_runtime_fault() {
        let err = sandbox().execute(b"(module (func", "extensions.bad").unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
        assert_eq!(err.category(), "RuntimeFault");
    }

    #[test]
    fn test_allowed_import_computes_value() {
        let wat = r#"(module
            (import "math" "sqrt" (func $sqrt (param f64) (result f64)))
            (import "math.trig" "cos" (func $cos (param f64) (result f64)))
            (global $root (export "root") (mut f64) (f64.const 0))
            (global $one (export "one") (mut f64) (f64.const 0))
            (global $answer (export "answer") i32 (i32.const 42))
            (func $init
                (global.set $root (call $sqrt (f64.const 16)))
                (global.set $one (call $cos (f64.const 0))))
            (func (export "double") (param i64) (result i64)
                (i64.mul (local.get 0) (i64.const 2)))
            (start $init))"#;

        let loaded = sandbox().execute(wat.as_bytes(), "extensions.calc").unwrap();
        assert_eq!(loaded.name(), "extensions.calc");
        assert_eq!(loaded.exports(), vec!["answer", "double", "one", "root"]);

        let ns = loaded.namespace();
        assert_eq!(ns["root"], Binding::Float(4.0));
        assert_eq!(ns["one"], Binding::Float(1.0));
        assert_eq!(ns["answer"], Binding::Int(42));
        assert_eq!(ns["double"], Binding::Function("(i64) -> (i64)".to_string()));
    }

    #[test]
    fn test_text_namespace_uses_guest_memory() {
        let wat = r#"(module
            (import "text" "char_count" (func $count (param i32 i32) (result i32)))
            (import "text" "to_upper" (func $upper (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "h\c3\a9llo")
            (global $chars (export "chars") (mut i32) (i32.const 0))
            (global $first (export "first") (mut i32) (i32.const 0))
            (func $init
                (global.set $chars (call $count (i32.const 0) (i32.const 6)))
                (call $upper (i32.const 0) (i32.const 1))
                (global.set $first (i32.load8_u (i32.const 0))))
            (start $init))"#;

        let loaded = sandbox().execute(wat.as_bytes(), "extensions.words").unwrap();
        let ns = loaded.namespace();
        assert_eq!(ns["chars"], Binding::Int(5));
        assert_eq!(ns["first"], Binding::Int(i64::from(b'H')));
        assert_eq!(ns["memory"], Binding::Memory(1));
    }

    #[test]
    fn test_structured_data_namespaces() {
        let wat = r##"(module
            (import "json" "get_i64" (func $get (param i32 i32 i32 i32) (result i64)))
            (import "json" "array_len" (func $alen (param i32 i32) (result i32)))
            (import "base64" "encode" (func $enc (param i32 i32 i32) (result i32)))
            (import "base64" "decode" (func $dec (param i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "{\"n\": 7}")
            (data (i32.const 16) "n")
            (data (i32.const 32) "[1,2,3]")
            (data (i32.const 64) "hi!")
            (global $n (export "n") (mut i64) (i64.const 0))
            (global $items (export "items") (mut i32) (i32.const 0))
            (global $encoded (export "encoded") (mut i32) (i32.const 0))
            (global $first (export "first") (mut i32) (i32.const 0))
            (global $decoded (export "decoded") (mut i32) (i32.const 0))
            (global $last (export "last") (mut i32) (i32.const 0))
            (func $init
                (global.set $n (call $get (i32.const 0) (i32.const 8) (i32.const 16) (i32.const 1)))
                (global.set $items (call $alen (i32.const 32) (i32.const 7)))
                (global.set $encoded (call $enc (i32.const 64) (i32.const 3) (i32.const 128)))
                (global.set $first (i32.load8_u (i32.const 128)))
                (global.set $decoded (call $dec (i32.const 128) (i32.const 4) (i32.const 192)))
                (global.set $last (i32.load8_u (i32.const 194))))
            (start $init))"##;

        let loaded = sandbox().execute(wat.as_bytes(), "extensions.data").unwrap();
        let ns = loaded.namespace();
        assert_eq!(ns["n"], Binding::Int(7));
        assert_eq!(ns["items"], Binding::Int(3));
        // "hi!" encodes to "aGkh"
        assert_eq!(ns["encoded"], Binding::Int(4));
        assert_eq!(ns["first"], Binding::Int(i64::from(b'a')));
        assert_eq!(ns["decoded"], Binding::Int(3));
        assert_eq!(ns["last"], Binding::Int(i64::from(b'!')));
    }

    #[test]
    fn test_invalid_base64_is_runtime_fault() {
        let wat = r#"(module
            (import "base64" "decode" (func $dec (param i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "!!!!")
            (func $init (drop (call $dec (i32.const 0) (i32.const 4) (i32.const 64))))
            (start $init))"#;

        let err = sandbox().execute(wat.as_bytes(), "extensions.bad64").unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
        assert_eq!(err.category(), "RuntimeFault");
    }

    #[test]
    fn test_collections_namespace_sorts_guest_array() {
        let wat = r#"(module
            (import "collections" "sort_i64" (func $sort (param i32 i32)))
            (import "collections" "bisect_i64" (func $bisect (param i32 i32 i64) (result i32)))
            (import "collections" "sum_i64" (func $sum (param i32 i32) (result i64)))
            (memory (export "memory") 1)
            (global $lowest (export "lowest") (mut i64) (i64.const 0))
            (global $highest (export "highest") (mut i64) (i64.const 0))
            (global $slot (export "slot") (mut i32) (i32.const 0))
            (global $total (export "total") (mut i64) (i64.const 0))
            (func $init
                (i64.store (i32.const 0) (i64.const 9))
                (i64.store (i32.const 8) (i64.const -4))
                (i64.store (i32.const 16) (i64.const 5))
                (call $sort (i32.const 0) (i32.const 3))
                (global.set $lowest (i64.load (i32.const 0)))
                (global.set $highest (i64.load (i32.const 16)))
                (global.set $slot (call $bisect (i32.const 0) (i32.const 3) (i64.const 6)))
                (global.set $total (call $sum (i32.const 0) (i32.const 3))))
            (start $init))"#;

        let loaded = sandbox().execute(wat.as_bytes(), "extensions.sorted").unwrap();
        let ns = loaded.namespace();
        assert_eq!(ns["lowest"], Binding::Int(-4));
        assert_eq!(ns["highest"], Binding::Int(9));
        assert_eq!(ns["slot"], Binding::Int(2));
        assert_eq!(ns["total"], Binding::Int(10));
    }

    #[test]
    fn test_host_error_becomes_runtime_fault() {
        let wat = r#"(module
            (import "text" "parse_int" (func $parse (param i32 i32) (result i64)))
            (memory (export "memory") 1)
            (data (i32.const 0) "abc")
            (func $init (drop (call $parse (i32.const 0) (i32.const 3))))
            (start $init))"#;

        let err = sandbox().execute(wat.as_bytes(), "extensions.parse").unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));
    }

    #[test]
    fn test_narrowed_policy() {
        let policy = SandboxPolicy {
            allowed_modules: vec!["text".to_string()],
            denied_operations: Vec::new(),
        };
        let sandbox = Sandbox::new(policy).unwrap();
        let wat = r#"(module (import "math" "sqrt" (func (param f64) (result f64))))"#;
        let err = sandbox.execute(wat.as_bytes(), "extensions.m").unwrap_err();
        assert!(matches!(err, SandboxError::DisallowedModule { ref allowed, .. } if allowed == &vec!["text".to_string()]));
    }
}
