use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::DocfeedConfig;
use crate::fs::relative_string;
use crate::git::Git;

/// Link between a context root and the git work tree that contains it.
///
/// The root may be the work tree itself or a subdirectory of it; `prefix`
/// is the root's position inside the work tree (with a trailing `/`) in the
/// latter case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitBinding {
    work_tree: PathBuf,
    prefix: Option<String>,
}

impl GitBinding {
    pub fn new(work_tree: PathBuf, root: &Path) -> Self {
        let prefix = relative_string(root, &work_tree).map(|p| format!("{p}/"));
        Self { work_tree, prefix }
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Map a work-tree-relative path (as git prints it) to a root-relative one.
    /// Paths outside the root yield `None`.
    pub fn to_root_relative<'a>(&self, repo_path: &'a str) -> Option<&'a str> {
        match &self.prefix {
            None => Some(repo_path),
            Some(prefix) => repo_path.strip_prefix(prefix.as_str()),
        }
    }

    /// Map a root-relative path to the work-tree-relative form git expects.
    pub fn to_repo_relative(&self, root_path: &str) -> String {
        match &self.prefix {
            None => root_path.to_string(),
            Some(prefix) => format!("{prefix}{root_path}"),
        }
    }
}

#[derive(Debug)]
struct ContextInner {
    root: PathBuf,
    excluded_dirs: BTreeSet<String>,
    show_hidden: bool,
    git: Git,
    binding: Option<GitBinding>,
}

/// One served directory and its (optional) git binding.
///
/// Immutable after [`RepositoryContext::open`]; cloning shares the same
/// underlying state.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    inner: Arc<ContextInner>,
}

impl RepositoryContext {
    /// Open a context rooted at `root`, detecting whether it lives inside a
    /// git work tree. A failed detection leaves the context unbound; only a
    /// missing or unreadable root is an error.
    pub async fn open(
        root: &Path,
        excluded_dirs: BTreeSet<String>,
        show_hidden: bool,
        git: Git,
    ) -> std::io::Result<Self> {
        let root = tokio::fs::canonicalize(root).await?;
        let binding = git
            .show_toplevel(&root)
            .await
            .map(|work_tree| GitBinding::new(work_tree, &root));
        debug!(
            root = %root.display(),
            versioned = binding.is_some(),
            "opened repository context"
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                root,
                excluded_dirs,
                show_hidden,
                git,
                binding,
            }),
        })
    }

    /// Open a context with the exclusion and git settings from `config`.
    pub async fn from_config(root: &Path, config: &DocfeedConfig) -> std::io::Result<Self> {
        Self::open(
            root,
            config.exclude_dirs.clone(),
            config.show_hidden,
            config.git(),
        )
        .await
    }

    /// Open the context for the immediate subdirectory `name`, inheriting
    /// this context's settings.
    pub async fn child(&self, name: &str) -> std::io::Result<Self> {
        Self::open(
            &self.inner.root.join(name),
            self.inner.excluded_dirs.clone(),
            self.inner.show_hidden,
            self.inner.git.clone(),
        )
        .await
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn excluded_dirs(&self) -> &BTreeSet<String> {
        &self.inner.excluded_dirs
    }

    pub fn show_hidden(&self) -> bool {
        self.inner.show_hidden
    }

    pub fn git(&self) -> &Git {
        &self.inner.git
    }

    pub fn binding(&self) -> Option<&GitBinding> {
        self.inner.binding.as_ref()
    }

    pub fn is_versioned(&self) -> bool {
        self.inner.binding.is_some()
    }

    /// Final component of the root, used as the display name.
    pub fn name(&self) -> String {
        self.inner
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.inner.root.display().to_string())
    }
}
