//! Path resolution under the project root

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

/// Collapse `.` and `..` without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping a root is a no-op, so `/..` stays `/`
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Links followed before giving up, as the OS does for `ELOOP`
const MAX_LINK_HOPS: usize = 40;

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
///
/// Symlinks anywhere in the existing part are followed, so a link pointing out
/// of the tree is seen for what it is. A dangling link is followed to its
/// target too, since writing through it would create that target.
pub fn canonicalize_existing(path: &Path) -> io::Result<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path.to_path_buf();
    let mut hops = 0;
    loop {
        match current.canonicalize() {
            Ok(real) => {
                let mut resolved = real;
                for part in missing.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let is_link = fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink());
                if is_link {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("too many levels of symbolic links: {}", path.display()),
                        ));
                    }
                    let target = fs::read_link(&current)?;
                    let base = match current.parent() {
                        Some(parent) => parent.canonicalize()?,
                        None => PathBuf::new(),
                    };
                    current = normalize(&base.join(target));
                    continue;
                }

                let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                current = parent.to_path_buf();
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolve a model-supplied path against the (canonical) root.
///
/// Fails with `OutsideRoot` when the physical location is not a descendant of
/// `root`. The prefix test is component-wise, so `/srv/app-evil` is not under
/// `/srv/app`.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let joined = root.join(requested.trim());
    let physical = canonicalize_existing(&normalize(&joined))?;
    if !physical.starts_with(root) {
        return Err(ToolError::OutsideRoot {
            path: requested.to_string(),
            resolved: physical,
        });
    }
    Ok(physical)
}
