//! Capability-gated access to the project tree
//!
//! Reads reach anything under the project root. Writes, deletes and hot-loads
//! are confined to the writable subtree and never touch a protected leaf name.

mod paths;

use anyhow::Context;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ToolError;
use crate::sandbox::{LoadedModule, Sandbox, SandboxPolicy};

/// Directories never listed
const SKIPPED_DIRS: &[&str] = &["target", "__pycache__", "node_modules"];

/// Extensions accepted by [`CapabilityStore::hot_load`]
const MODULE_EXTENSIONS: &[&str] = &["wat", "wasm"];

/// Which paths may be modified
#[derive(Debug, Clone)]
pub struct ProtectionPolicy {
    /// Leaf file names that can never be written or deleted, wherever they are
    pub protected: BTreeSet<String>,
    /// The only subtree (relative to the root) where modifications are allowed
    pub writable_dir: PathBuf,
}

impl ProtectionPolicy {
    pub fn is_protected_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.protected.contains(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Protected,
    Writable,
    Other,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            FileKind::Protected => "protected",
            FileKind::Writable => "writable",
            FileKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
}

/// File store plus the registry of hot-loaded extension modules
pub struct CapabilityStore {
    root: PathBuf,
    writable_root: PathBuf,
    policy: ProtectionPolicy,
    sandbox: Sandbox,
    modules: BTreeMap<String, LoadedModule>,
}

impl CapabilityStore {
    /// Open a store over `root`, creating the writable subtree if missing
    pub fn new(root: &Path, policy: ProtectionPolicy, sandbox: Sandbox) -> anyhow::Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Project root does not exist: {}", root.display()))?;

        let writable = root.join(&policy.writable_dir);
        fs::create_dir_all(&writable)
            .with_context(|| format!("Failed to create writable directory: {}", writable.display()))?;
        let writable_root = writable.canonicalize()?;
        if !writable_root.starts_with(&root) {
            anyhow::bail!(
                "Writable directory {} is outside the project root",
                writable_root.display()
            );
        }

        debug!(root = %root.display(), writable = %writable_root.display(), "Opened capability store");
        Ok(Self {
            root,
            writable_root,
            policy,
            sandbox,
            modules: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    pub fn sandbox_policy(&self) -> &SandboxPolicy {
        self.sandbox.policy()
    }

    /// Path relative to the root, with `/` separators
    fn relative(&self, physical: &Path) -> String {
        let rel = physical.strip_prefix(&self.root).unwrap_or(physical);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a path for modification: inside the root, inside the writable
    /// subtree and not a protected name
    fn resolve_writable(&self, requested: &str) -> Result<PathBuf, ToolError> {
        let physical = paths::resolve(&self.root, requested)?;

        if physical == self.writable_root || !physical.starts_with(&self.writable_root) {
            return Err(ToolError::ProtectionViolation {
                path: requested.to_string(),
                reason: format!(
                    "only files inside '{}/' can be modified",
                    self.policy.writable_dir.display()
                ),
            });
        }
        if self.policy.is_protected_name(&physical) {
            return Err(ToolError::ProtectionViolation {
                path: requested.to_string(),
                reason: format!(
                    "this is a protected file. Protected names: {:?}",
                    self.policy.protected
                ),
            });
        }
        Ok(physical)
    }

    fn kind_of(&self, physical: &Path) -> FileKind {
        if self.policy.is_protected_name(physical) {
            FileKind::Protected
        } else if physical.starts_with(&self.writable_root) {
            FileKind::Writable
        } else {
            FileKind::Other
        }
    }

    /// Read any file under the root
    pub fn read_file(&self, requested: &str) -> Result<String, ToolError> {
        let physical = paths::resolve(&self.root, requested)?;
        if !physical.exists() {
            return Err(ToolError::NotFound(requested.to_string()));
        }
        if physical.is_dir() {
            return Err(ToolError::IsDirectory(requested.to_string()));
        }
        let bytes = fs::read(&physical)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create or overwrite a file in the writable subtree
    pub fn write_file(&mut self, requested: &str, content: &str) -> Result<String, ToolError> {
        let physical = self.resolve_writable(requested)?;
        if physical.is_dir() {
            return Err(ToolError::IsDirectory(requested.to_string()));
        }
        if let Some(parent) = physical.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&physical, content)?;

        info!(path = %self.relative(&physical), bytes = content.len(), "File written");
        Ok(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            self.relative(&physical)
        ))
    }

    /// Delete a file in the writable subtree, unregistering any module loaded from it
    pub fn delete_file(&mut self, requested: &str) -> Result<String, ToolError> {
        let physical = self.resolve_writable(requested)?;
        if !physical.exists() {
            return Err(ToolError::NotFound(requested.to_string()));
        }
        if physical.is_dir() {
            return Err(ToolError::IsDirectory(requested.to_string()));
        }
        fs::remove_file(&physical)?;

        let rel = self.relative(&physical);
        if let Some(id) = module_id(&rel) {
            if self.modules.remove(&id).is_some() {
                info!(module = %id, "Unregistered module after delete");
            }
        }
        info!(path = %rel, "File deleted");
        Ok(format!("Deleted {}", rel))
    }

    /// Every regular file under the root, sorted by path
    pub fn list_files(&self) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                // The root itself is passed to the predicate too
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.')
                    && !(e.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
            })
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| FileEntry {
                path: self.relative(e.path()),
                kind: self.kind_of(e.path()),
                size: e.metadata().map(|m| m.len()).unwrap_or(0),
            })
            .collect();

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Execute a module source from the writable subtree in the sandbox and register it
    pub fn hot_load(&mut self, requested: &str) -> Result<String, ToolError> {
        let physical = paths::resolve(&self.root, requested)?;
        if !physical.starts_with(&self.writable_root) {
            return Err(ToolError::ProtectionViolation {
                path: requested.to_string(),
                reason: format!(
                    "can only hot-load modules from '{}/'",
                    self.policy.writable_dir.display()
                ),
            });
        }

        let recognized = physical
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| MODULE_EXTENSIONS.contains(&e));
        if !recognized {
            return Err(ToolError::InvalidArgument(format!(
                "can only hot-load .wat or .wasm files, got '{}'",
                requested
            )));
        }
        if !physical.exists() {
            return Err(ToolError::NotFound(requested.to_string()));
        }
        if physical.is_dir() {
            return Err(ToolError::IsDirectory(requested.to_string()));
        }

        let rel = self.relative(&physical);
        let id = module_id(&rel).unwrap_or_else(|| rel.clone());
        let source = fs::read(&physical)?;

        let loaded = self.sandbox.execute(&source, &id)?;
        let exports: Vec<String> = loaded.exports().iter().map(|s| s.to_string()).collect();
        if self.modules.insert(id.clone(), loaded).is_some() {
            debug!(module = %id, "Replaced previously loaded module");
        }
        info!(module = %id, exports = exports.len(), "Module hot-loaded");

        let defined = if exports.is_empty() {
            "(nothing)".to_string()
        } else {
            format!("{:?}", exports)
        };
        Ok(format!("Loaded module '{}' in sandbox. Defined: {}", id, defined))
    }

    pub fn module(&self, id: &str) -> Option<&LoadedModule> {
        self.modules.get(id)
    }

    /// Ids of registered modules, sorted
    pub fn loaded_modules(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CapabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityStore")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("modules", &self.loaded_modules())
            .finish()
    }
}

/// `extensions/foo/bar.wat` → `extensions.foo.bar`
fn module_id(rel: &str) -> Option<String> {
    let (stem, ext) = rel.rsplit_once('.')?;
    if !MODULE_EXTENSIONS.contains(&ext) || stem.is_empty() {
        return None;
    }
    Some(stem.replace('/', "."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxPolicy;
    use tempfile::TempDir;

    const ANSWER_WAT: &str = r#"(module (global (export "answer") i32 (i32.const 42)))"#;

    fn store(dir: &TempDir) -> CapabilityStore {
        let policy = ProtectionPolicy {
            protected: ["main.rs", "Cargo.toml", "mod.rs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            writable_dir: PathBuf::from("extensions"),
        };
        let sandbox = Sandbox::new(SandboxPolicy::default()).unwrap();
        CapabilityStore::new(dir.path(), policy, sandbox).unwrap()
    }

    #[test]
    fn test_creates_writable_dir() {
        let temp_dir = TempDir::new().unwrap();
        let _store = store(&temp_dir);
        assert!(temp_dir.path().join("extensions").is_dir());
    }

    #[test]
    fn test_write_read_delete() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        let msg = store.write_file("extensions/notes/a.txt", "hello").unwrap();
        assert_eq!(msg, "Successfully wrote 5 bytes to extensions/notes/a.txt");
        assert_eq!(store.read_file("extensions/notes/a.txt").unwrap(), "hello");

        assert_eq!(store.delete_file("extensions/notes/a.txt").unwrap(), "Deleted extensions/notes/a.txt");
        let err = store.read_file("extensions/notes/a.txt").unwrap_err();
        assert!(err.tagged().starts_with("[not found]"));
    }

    #[test]
    fn test_read_anywhere_under_root() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("Cargo.toml"), "[package]").unwrap();
        let store = store(&temp_dir);

        assert_eq!(store.read_file("Cargo.toml").unwrap(), "[package]");
        assert!(matches!(store.read_file("extensions").unwrap_err(), ToolError::IsDirectory(_)));
        assert!(matches!(store.read_file("../x").unwrap_err(), ToolError::OutsideRoot { .. }));
    }

    #[test]
    fn test_write_outside_writable_dir_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        let err = store.write_file("src/new.rs", "fn main() {}").unwrap_err();
        assert!(err.tagged().starts_with("[capability violation]"));
        assert!(!temp_dir.path().join("src/new.rs").exists());
    }

    #[test]
    fn test_protected_name_inside_writable_dir_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        let err = store.write_file("extensions/main.rs", "").unwrap_err();
        assert!(matches!(err, ToolError::ProtectionViolation { .. }));
        let err = store.delete_file("extensions/sub/mod.rs").unwrap_err();
        assert!(matches!(err, ToolError::ProtectionViolation { .. }));
    }

    #[test]
    fn test_dotdot_escape_is_outside_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        let err = store.write_file("extensions/../../escape.txt", "x").unwrap_err();
        assert!(err.tagged().starts_with("[outside root]"));

        // Lexically inside extensions/ at first glance, but resolves to the root
        let err = store.write_file("extensions/../notes.txt", "x").unwrap_err();
        assert!(matches!(err, ToolError::ProtectionViolation { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_through_dangling_symlink_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let mut store = store(&temp_dir);
        let target = outside.path().join("pwned.txt");
        std::os::unix::fs::symlink(&target, temp_dir.path().join("extensions/link")).unwrap();

        let err = store.write_file("extensions/link", "escaped").unwrap_err();
        assert!(matches!(err, ToolError::OutsideRoot { .. }));
        assert!(!target.exists());

        let err = store.delete_file("extensions/link").unwrap_err();
        assert!(matches!(err, ToolError::OutsideRoot { .. }));
    }

    #[test]
    fn test_list_files_skips_hidden_and_build_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("Cargo.toml"), "x").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::write(root.join("target/debug/bin"), "elf").unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();

        let mut store = store(&temp_dir);
        store.write_file("extensions/b.wat", "(module)").unwrap();

        let files = store.list_files();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.toml", "extensions/b.wat", "src/lib.rs"]);

        assert_eq!(files[0].kind, FileKind::Protected);
        assert_eq!(files[1].kind, FileKind::Writable);
        assert_eq!(files[1].size, 8);
        assert_eq!(files[2].kind, FileKind::Other);
    }

    #[test]
    fn test_hot_load_registers_replaces_and_unregisters() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        store.write_file("extensions/x/y.wat", ANSWER_WAT).unwrap();
        let msg = store.hot_load("extensions/x/y.wat").unwrap();
        assert_eq!(msg, "Loaded module 'extensions.x.y' in sandbox. Defined: [\"answer\"]");
        assert_eq!(store.loaded_modules(), vec!["extensions.x.y"]);

        store.write_file("extensions/x/y.wat", "(module)").unwrap();
        let msg = store.hot_load("extensions/x/y.wat").unwrap();
        assert!(msg.ends_with("Defined: (nothing)"));
        assert_eq!(store.loaded_modules().len(), 1);
        assert!(store.module("extensions.x.y").unwrap().namespace().is_empty());

        store.delete_file("extensions/x/y.wat").unwrap();
        assert!(store.loaded_modules().is_empty());
    }

    #[test]
    fn test_hot_load_restrictions() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("root.wat"), ANSWER_WAT).unwrap();
        let mut store = store(&temp_dir);

        let err = store.hot_load("root.wat").unwrap_err();
        assert!(matches!(err, ToolError::ProtectionViolation { .. }));

        store.write_file("extensions/script.py", "print(1)").unwrap();
        let err = store.hot_load("extensions/script.py").unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument(_)));

        let err = store.hot_load("extensions/missing.wat").unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn test_hot_load_sandbox_violation_is_tagged() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store(&temp_dir);

        store
            .write_file("extensions/evil.wat", r#"(module (import "env" "system" (func)))"#)
            .unwrap();
        let err = store.hot_load("extensions/evil.wat").unwrap_err();
        assert!(err.tagged().starts_with("[capability violation]"));
        assert!(store.loaded_modules().is_empty());
    }

    #[test]
    fn test_module_id() {
        assert_eq!(module_id("extensions/foo/bar.wat").as_deref(), Some("extensions.foo.bar"));
        assert_eq!(module_id("extensions/a.wasm").as_deref(), Some("extensions.a"));
        assert_eq!(module_id("extensions/a.txt"), None);
    }
}
