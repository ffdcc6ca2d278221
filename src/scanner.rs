//! Untracked-file discovery.
//!
//! The scan fans out one worker per top-level subdirectory plus a synchronous
//! pass over the top-level files. Workers run on the blocking pool behind a
//! shared semaphore, so a single slow subtree only delays the overall result,
//! never its siblings, and a worker that fails contributes nothing.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::RepositoryContext;
use crate::fs::{has_excluded_component, has_hidden_directory, is_hidden, list_directory, relative_string};
use crate::record::{ChangeRecord, ExtensionSet, modified_at};

/// Which entries a scan considers.
///
/// Directories are pruned before descending when their name is excluded or
/// hidden. Files must carry one of the extensions.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    excluded: BTreeSet<String>,
    extensions: ExtensionSet,
}

impl ScanFilter {
    pub fn new(excluded: BTreeSet<String>, extensions: ExtensionSet) -> Self {
        Self {
            excluded,
            extensions,
        }
    }

    pub fn for_context(context: &RepositoryContext, extensions: &ExtensionSet) -> Self {
        Self::new(context.excluded_dirs().clone(), extensions.clone())
    }

    pub fn prunes_dir(&self, name: &str) -> bool {
        is_hidden(name) || self.excluded.contains(name)
    }

    pub fn matches_file(&self, name: &str) -> bool {
        self.extensions.matches(name)
    }

    /// Would a root-relative path found by any source survive this filter?
    pub fn admits(&self, rel: &str) -> bool {
        self.extensions.matches(rel)
            && !has_excluded_component(rel, &self.excluded)
            && !has_hidden_directory(rel)
    }

    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }
}

/// Non-recursive view of a scan root.
#[derive(Debug, Default)]
pub struct TopLevel {
    /// Subdirectory names that survive pruning.
    pub dirs: Vec<String>,
    /// Matching file names directly in the root.
    pub files: Vec<String>,
}

/// List `root` once, splitting it into subdirectories to walk and matching
/// top-level files. An unreadable root gives an empty listing.
pub fn list_top_level(root: &Path, filter: &ScanFilter) -> TopLevel {
    let entries = match list_directory(root, "", filter.excluded(), true) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(root = %root.display(), error = %err, "failed to list scan root");
            return TopLevel::default();
        }
    };

    let mut top = TopLevel::default();
    for entry in entries {
        if entry.is_dir {
            if !filter.prunes_dir(&entry.name) {
                top.dirs.push(entry.name);
            }
        } else if filter.matches_file(&entry.name) {
            top.files.push(entry.name);
        }
    }
    top
}

/// Pool size for one aggregation: two slots for the git calls plus one per
/// subdirectory, clamped to `4..=12`.
pub fn worker_count(top_level_dirs: usize) -> usize {
    (2 + top_level_dirs).clamp(4, 12)
}

/// Walk `dir` recursively and return records for matching files that are not
/// in `tracked`. Paths are relative to `root`. Unreadable entries are skipped.
pub fn walk_directory(
    root: &Path,
    dir: &Path,
    filter: Arc<ScanFilter>,
    tracked: &HashSet<String>,
) -> Vec<ChangeRecord> {
    let prune = Arc::clone(&filter);
    let walker = ignore::WalkBuilder::new(dir)
        // Exclusion is by directory name only; .gitignore does not hide documents.
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if !is_dir {
                return true;
            }
            entry
                .file_name()
                .to_str()
                .map(|name| !prune.prunes_dir(name))
                .unwrap_or(false)
        })
        .build();

    let mut found = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(true) {
            continue;
        }

        let path = entry.path();
        let Some(rel) = relative_string(path, root) else {
            continue;
        };
        if !filter.matches_file(&rel) || tracked.contains(&rel) {
            continue;
        }
        if let Some(timestamp) = modified_at(path) {
            found.push(ChangeRecord::untracked(rel, timestamp));
        }
    }
    found
}

/// An in-flight scan started by [`start_scan`].
pub struct UntrackedScan {
    top_level: Vec<ChangeRecord>,
    workers: JoinSet<Vec<ChangeRecord>>,
}

/// Start walking every directory in `top` concurrently.
///
/// Each worker holds a permit from `pool` for the duration of its walk, so
/// the pool can be shared with other units of the same aggregation.
pub fn start_scan(
    root: &Path,
    top: TopLevel,
    filter: Arc<ScanFilter>,
    tracked: Arc<HashSet<String>>,
    pool: Arc<Semaphore>,
) -> UntrackedScan {
    let top_level = top
        .files
        .into_iter()
        .filter(|name| !tracked.contains(name))
        .filter_map(|name| {
            let timestamp = modified_at(&root.join(&name))?;
            Some(ChangeRecord::untracked(name, timestamp))
        })
        .collect();

    let mut workers = JoinSet::new();
    for name in top.dirs {
        let root: PathBuf = root.to_path_buf();
        let filter = Arc::clone(&filter);
        let tracked = Arc::clone(&tracked);
        let pool = Arc::clone(&pool);
        workers.spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return Vec::new();
            };
            let dir = root.join(&name);
            tokio::task::spawn_blocking(move || walk_directory(&root, &dir, filter, &tracked))
                .await
                .unwrap_or_else(|err| {
                    warn!(dir = %name, error = %err, "scan worker failed");
                    Vec::new()
                })
        });
    }

    UntrackedScan { top_level, workers }
}

impl UntrackedScan {
    /// Wait for every worker and concatenate their results, ordered by path
    /// so that completion order never shows through.
    pub async fn finish(mut self) -> Vec<ChangeRecord> {
        let mut records = self.top_level;
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(found) => records.extend(found),
                Err(err) => warn!(error = %err, "scan worker failed"),
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}

/// Scan the whole tree under `root` as untracked, skipping the top-level
/// directories named in `skip`.
pub async fn scan_tree(
    root: &Path,
    filter: Arc<ScanFilter>,
    skip: &HashSet<String>,
) -> Vec<ChangeRecord> {
    let mut top = list_top_level(root, &filter);
    top.dirs.retain(|name| !skip.contains(name));
    let pool = Arc::new(Semaphore::new(worker_count(top.dirs.len())));
    start_scan(root, top, filter, Arc::new(HashSet::new()), pool)
        .finish()
        .await
}
