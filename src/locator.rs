//! Child-repository discovery for roots that are not themselves under git.
//!
//! A context is exactly one of: versioned (bound to a work tree), a container
//! of independent repositories one level down, or plain. Discovery looks one
//! level deep only; a child is never treated as a container itself.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::aggregate::collect_leaf;
use crate::context::{GitBinding, RepositoryContext};
use crate::fs::{CONTROL_DIR, is_hidden};
use crate::record::{ChangeRecord, ExtensionSet};
use crate::scanner::{ScanFilter, scan_tree};

/// How a context's feed is assembled.
#[derive(Debug)]
pub enum Layout<'a> {
    Versioned(&'a GitBinding),
    /// Names of immediate subdirectories that are repositories.
    Container(Vec<String>),
    Plain,
}

pub fn layout(context: &RepositoryContext) -> Layout<'_> {
    if let Some(binding) = context.binding() {
        return Layout::Versioned(binding);
    }
    let children = discover_child_repositories(context);
    if children.is_empty() {
        Layout::Plain
    } else {
        Layout::Container(children)
    }
}

/// True if `dir` carries a git control directory (or a worktree `.git` file).
pub fn is_repository(dir: &Path) -> bool {
    dir.join(CONTROL_DIR).exists()
}

/// Immediate subdirectories of an unbound root that are git repositories,
/// sorted by name. Hidden and excluded names are never considered.
pub fn discover_child_repositories(context: &RepositoryContext) -> Vec<String> {
    let entries = match std::fs::read_dir(context.root()) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(root = %context.root().display(), error = %err, "cannot list container root");
            return Vec::new();
        }
    };

    let mut children: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if is_hidden(&name) || context.excluded_dirs().contains(&name) {
                return None;
            }
            is_repository(&entry.path()).then_some(name)
        })
        .collect();
    children.sort();
    children
}

/// Split a container-relative path into the owning child repository and the
/// path inside it. Top-level files and paths in non-repository directories
/// give `None`.
pub async fn child_repository_for(
    context: &RepositoryContext,
    path: &str,
) -> Option<(RepositoryContext, String)> {
    let normalized = path.replace('\\', "/");
    let (child_name, rest) = normalized.split_once('/')?;
    if rest.is_empty() || is_hidden(child_name) || context.excluded_dirs().contains(child_name) {
        return None;
    }
    if !is_repository(&context.root().join(child_name)) {
        return None;
    }
    let child = context.child(child_name).await.ok()?;
    child
        .is_versioned()
        .then(|| (child, rest.to_string()))
}

/// Feed records for a container root.
///
/// Every child repository runs the full versioned pipeline concurrently and
/// its paths are prefixed with `<child>/`. Files directly in the root and in
/// non-repository subdirectories are scanned as untracked. Each child's
/// contribution is already trimmed to `limit`.
pub async fn collect_container(
    context: &RepositoryContext,
    children: Vec<String>,
    limit: usize,
    extensions: &ExtensionSet,
) -> Vec<ChangeRecord> {
    let mut workers = JoinSet::new();
    for name in &children {
        let parent = context.clone();
        let name = name.clone();
        let extensions = extensions.clone();
        workers.spawn(async move {
            let child = match parent.child(&name).await {
                Ok(child) => child,
                Err(err) => {
                    warn!(child = %name, error = %err, "failed to open child repository");
                    return Vec::new();
                }
            };
            collect_leaf(&child, limit, &extensions)
                .await
                .into_iter()
                .map(|record| record.prefixed(&name))
                .collect::<Vec<_>>()
        });
    }

    let filter = Arc::new(ScanFilter::for_context(context, extensions));
    let skip: HashSet<String> = children.into_iter().collect();
    let mut records = scan_tree(context.root(), filter, &skip).await;

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(found) => records.extend(found),
            Err(err) => warn!(error = %err, "child repository worker failed"),
        }
    }
    records
}
