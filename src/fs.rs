//! Filesystem glue: path validation, filtered directory listing and the
//! relative-path helpers shared by the scanner, the log reader and the watcher.
//!
//! All relative paths handed around the crate are `/`-separated strings
//! relative to a context root, matching what `git` prints.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::PathError;

/// Name of the git control directory.
pub const CONTROL_DIR: &str = ".git";

/// Validate a user-supplied relative path and resolve it under `root`.
///
/// Rejects:
/// - empty input and null bytes
/// - absolute paths
/// - any `.git` component
/// - anything that resolves outside `root` (including via symlinks)
///
/// The returned path is absolute. Paths that do not exist yet are resolved
/// lexically.
pub fn resolve_path(root: &Path, path: &str) -> Result<PathBuf, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.contains('\0') {
        return Err(PathError::NullByte);
    }
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') || Path::new(path).is_absolute() {
        return Err(PathError::Absolute);
    }
    if normalized.split('/').any(|part| part == CONTROL_DIR) {
        return Err(PathError::ControlDirectory);
    }

    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut resolved = root.clone();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(PathError::Traversal);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Absolute),
        }
    }

    // Follow symlinks for anything that exists so a link can't escape the root.
    let resolved = resolved.canonicalize().unwrap_or(resolved);
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(PathError::Traversal)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    /// Path relative to the listing root, `/`-separated.
    pub path: String,
    pub is_dir: bool,
}

/// List `dir` (relative to `root`) with the exclusion filter applied.
///
/// Excluded names are always dropped. Hidden entries (leading `.`) are dropped
/// unless `show_hidden` is set. Directories sort before files, then by
/// case-insensitive name. Unreadable entries are skipped.
pub fn list_directory(
    root: &Path,
    dir: &str,
    excluded: &BTreeSet<String>,
    show_hidden: bool,
) -> std::io::Result<Vec<DirEntry>> {
    let base = if dir.is_empty() || dir == "." {
        root.to_path_buf()
    } else {
        root.join(dir)
    };

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&base)? {
        let Ok(entry) = entry else { continue };
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if excluded.contains(&name) {
            continue;
        }
        if !show_hidden && is_hidden(&name) {
            continue;
        }
        // file_type() does not follow symlinks: a linked directory is listed
        // as a plain entry.
        let is_dir = entry
            .file_type()
            .map(|ft| ft.is_dir())
            .unwrap_or(false);
        let path = match relative_string(&entry.path(), root) {
            Some(p) => p,
            None => continue,
        };
        entries.push(DirEntry { name, path, is_dir });
    }

    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(entries)
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// `path` relative to `base` as a `/`-joined string.
pub fn relative_string(path: &Path, base: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// True if any segment of `rel` (including the file name) is an excluded name.
pub fn has_excluded_component(rel: &str, excluded: &BTreeSet<String>) -> bool {
    rel.split('/').any(|part| excluded.contains(part))
}

/// True if any directory segment of `rel` is hidden. The file name itself is
/// not considered.
pub fn has_hidden_directory(rel: &str) -> bool {
    let mut parts: Vec<&str> = rel.split('/').collect();
    parts.pop();
    parts.iter().any(|part| is_hidden(part))
}
