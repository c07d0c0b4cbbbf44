//! Worktree containment.
//!
//! File tools resolve every requested path through this function.  The check
//! is lexical: `..` components are tracked against the depth of what has
//! been accepted so far, so no filesystem access (or symlink resolution
//! race) is involved in rejecting an escape.

use std::path::{Component, Path, PathBuf};

/// Resolve `requested` inside `worktree_root`, rejecting anything whose
/// lexical normalization would escape the root.
pub fn resolve_in_worktree(worktree_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the worktree (got '{requested}')"
        ));
    }

    let mut accepted: Vec<&std::ffi::OsStr> = Vec::new();
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => accepted.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if accepted.pop().is_none() {
                    return Err(format!(
                        "path '{requested}' escapes the worktree root"
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path '{requested}' is not relative"));
            }
        }
    }

    let mut resolved = worktree_root.to_path_buf();
    for part in accepted {
        resolved.push(part);
    }
    Ok(resolved)
}
