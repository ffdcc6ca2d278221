//! The recently-changed feed.
//!
//! A feed merges three sources for a versioned root: the latest revision of
//! every indexed path in the recent log, the untracked scan, and the index
//! itself (for paths that are staged but have never been committed). Container and
//! plain roots are handled by [`crate::locator`] and [`crate::scanner`].
//! Every record is ranked by filesystem modification time.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::cache::{CacheKey, Feed, FeedCache, get_or_compute};
use crate::context::{GitBinding, RepositoryContext};
use crate::git::log::{RevisionSummary, latest_per_path, recent_log};
use crate::git::status::{intent_to_add, status_snapshot};
use crate::git::tracked::tracked_set;
use crate::locator::{Layout, collect_container, layout};
use crate::record::{ChangeRecord, ExtensionSet, modified_at};
use crate::scanner::{ScanFilter, list_top_level, scan_tree, start_scan, worker_count};

/// Cached front door to [`collect`].
#[derive(Clone)]
pub struct RecencyAggregator {
    cache: Arc<dyn FeedCache>,
}

impl RecencyAggregator {
    pub fn new(cache: Arc<dyn FeedCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Arc<dyn FeedCache> {
        Arc::clone(&self.cache)
    }

    /// The `limit` most recently modified matching files under `context`.
    ///
    /// Results are served from the cache while fresh. Git failures degrade to
    /// missing entries; this never errors.
    pub async fn aggregate(
        &self,
        context: &RepositoryContext,
        limit: usize,
        extensions: &ExtensionSet,
    ) -> Feed {
        let key = CacheKey {
            root: context.root().to_path_buf(),
            limit,
            extensions: extensions.clone(),
        };
        get_or_compute(self.cache.as_ref(), key, || {
            collect(context, limit, extensions)
        })
        .await
    }

    pub fn invalidate(&self, context: &RepositoryContext) {
        self.cache.invalidate(context.root());
    }

    pub fn invalidate_all(&self) {
        self.cache.flush_all();
    }
}

/// Build the feed for `context` without consulting any cache.
pub async fn collect(
    context: &RepositoryContext,
    limit: usize,
    extensions: &ExtensionSet,
) -> Vec<ChangeRecord> {
    if limit == 0 || extensions.is_empty() {
        return Vec::new();
    }
    let records = match layout(context) {
        Layout::Versioned(binding) => collect_versioned(context, binding, extensions).await,
        Layout::Container(children) => {
            debug!(root = %context.root().display(), children = children.len(), "container root");
            collect_container(context, children, limit, extensions).await
        }
        Layout::Plain => collect_plain(context, extensions).await,
    };
    rank(records, limit)
}

/// Feed for a child of a container: versioned or plain, never a container.
pub async fn collect_leaf(
    context: &RepositoryContext,
    limit: usize,
    extensions: &ExtensionSet,
) -> Vec<ChangeRecord> {
    let records = match context.binding() {
        Some(binding) => collect_versioned(context, binding, extensions).await,
        None => collect_plain(context, extensions).await,
    };
    rank(records, limit)
}

async fn collect_plain(context: &RepositoryContext, extensions: &ExtensionSet) -> Vec<ChangeRecord> {
    let filter = Arc::new(ScanFilter::for_context(context, extensions));
    scan_tree(context.root(), filter, &HashSet::new()).await
}

async fn collect_versioned(
    context: &RepositoryContext,
    binding: &GitBinding,
    extensions: &ExtensionSet,
) -> Vec<ChangeRecord> {
    let root = context.root();
    let filter = Arc::new(ScanFilter::for_context(context, extensions));
    let tracked = Arc::new(tracked_set(context).await);

    let top = list_top_level(root, &filter);
    let pool = Arc::new(Semaphore::new(worker_count(top.dirs.len())));

    // Both git calls share the scan's pool.
    let log_task = {
        let git = context.git().clone();
        let binding = binding.clone();
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.ok();
            recent_log(&git, &binding).await
        })
    };
    let status_task = {
        let context = context.clone();
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await.ok();
            status_snapshot(&context).await
        })
    };
    let scan = start_scan(root, top, Arc::clone(&filter), Arc::clone(&tracked), pool);

    let log_output = log_task.await.unwrap_or_default();
    let status_output = status_task.await.unwrap_or_default();
    let walked = scan.finish().await;

    merge_versioned(
        root,
        &filter,
        intent_to_add(&status_output, binding),
        latest_per_path(&log_output, binding),
        walked,
        &tracked,
    )
}

/// Merge the sources of a versioned root into one record per path.
///
/// Priority, highest first:
/// 1. intent-to-add entries: in the index with no revision, always untracked;
/// 2. index members with a log entry: tracked, with the revision's metadata;
/// 3. untracked scan hits;
/// 4. remaining tracked-set members (staged but never logged): untracked.
///
/// A log entry for a path outside the index (deleted then re-created, or
/// removed with `git rm --cached`) is ignored. Paths whose file no longer
/// exists are dropped.
pub fn merge_versioned(
    root: &Path,
    filter: &ScanFilter,
    intent_to_add: Vec<String>,
    history: Vec<(String, RevisionSummary)>,
    walked: Vec<ChangeRecord>,
    tracked: &HashSet<String>,
) -> Vec<ChangeRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for rel in intent_to_add {
        if seen.contains(&rel) || !filter.admits(&rel) {
            continue;
        }
        if let Some(timestamp) = modified_at(&root.join(&rel)) {
            seen.insert(rel.clone());
            records.push(ChangeRecord::untracked(rel, timestamp));
        }
    }

    for (rel, revision) in history {
        if seen.contains(&rel) || !tracked.contains(&rel) || !filter.admits(&rel) {
            continue;
        }
        if let Some(timestamp) = modified_at(&root.join(&rel)) {
            seen.insert(rel.clone());
            records.push(ChangeRecord::tracked(rel, timestamp, &revision));
        }
    }

    for record in walked {
        if seen.insert(record.path.clone()) {
            records.push(record);
        }
    }

    let mut unlogged: Vec<&String> = tracked
        .iter()
        .filter(|rel| !seen.contains(rel.as_str()) && filter.admits(rel))
        .collect();
    unlogged.sort();
    for rel in unlogged {
        if let Some(timestamp) = modified_at(&root.join(rel)) {
            seen.insert(rel.clone());
            records.push(ChangeRecord::untracked(rel.clone(), timestamp));
        }
    }

    records
}

/// De-duplicate by path (first occurrence wins), sort newest first (stable on
/// ties) and keep at most `limit` records.
pub fn rank(records: impl IntoIterator<Item = ChangeRecord>, limit: usize) -> Vec<ChangeRecord> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<ChangeRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.path.clone()))
        .collect();
    ranked.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use std::fs;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn revision(id: &str) -> RevisionSummary {
        RevisionSummary {
            revision_id: id.to_string(),
            author: "Ada".to_string(),
            author_email: "ada@example.com".to_string(),
            timestamp: Utc::now() - Duration::days(3),
            message: format!("commit {id}"),
        }
    }

    #[test]
    fn test_rank_dedups_sorts_and_truncates() {
        let records = vec![
            ChangeRecord::untracked("a.md".into(), at(10)),
            ChangeRecord::untracked("b.md".into(), at(30)),
            ChangeRecord::untracked("a.md".into(), at(99)),
            ChangeRecord::untracked("c.md".into(), at(20)),
        ];
        let ranked = rank(records, 2);
        let paths: Vec<&str> = ranked.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["b.md", "c.md"]);
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let records = vec![
            ChangeRecord::untracked("first.md".into(), at(5)),
            ChangeRecord::untracked("second.md".into(), at(5)),
            ChangeRecord::untracked("third.md".into(), at(5)),
        ];
        let ranked = rank(records, 10);
        let paths: Vec<&str> = ranked.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["first.md", "second.md", "third.md"]);
    }

    #[test]
    fn test_rank_zero_limit_is_empty() {
        assert!(rank(vec![ChangeRecord::untracked("a.md".into(), at(0))], 0).is_empty());
    }

    #[test]
    fn test_merge_tracks_logged_index_members() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("indexed.md"), "x").unwrap();
        let filter = ScanFilter::new(Default::default(), ExtensionSet::default());

        let tracked: HashSet<String> = ["indexed.md".to_string()].into_iter().collect();
        let history = vec![("indexed.md".to_string(), revision("r1"))];
        let merged = merge_versioned(dir.path(), &filter, vec![], history, vec![], &tracked);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].tracked);
        assert_eq!(merged[0].revision_id, "r1");
        assert_eq!(merged[0].message, "commit r1");
    }

    #[test]
    fn test_merge_ignores_history_for_paths_outside_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("recreated.md"), "x").unwrap();
        let filter = ScanFilter::new(Default::default(), ExtensionSet::default());

        let walked = vec![ChangeRecord::untracked("recreated.md".into(), Utc::now())];
        let history = vec![("recreated.md".to_string(), revision("removed"))];
        let merged = merge_versioned(dir.path(), &filter, vec![], history, walked, &HashSet::new());

        assert_eq!(merged.len(), 1);
        assert!(!merged[0].tracked);
        assert!(merged[0].revision_id.is_empty());
        assert!(merged[0].message.is_empty());
    }

    #[test]
    fn test_merge_intent_to_add_beats_history() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readded.md"), "x").unwrap();
        let filter = ScanFilter::new(Default::default(), ExtensionSet::default());

        let tracked: HashSet<String> = ["readded.md".to_string()].into_iter().collect();
        let merged = merge_versioned(
            dir.path(),
            &filter,
            vec!["readded.md".to_string()],
            vec![("readded.md".to_string(), revision("old"))],
            vec![],
            &tracked,
        );
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].tracked);
        assert!(merged[0].revision_id.is_empty());
    }

    #[test]
    fn test_merge_reconciles_unlogged_tracked_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("docs/staged.md"), "x").unwrap();
        fs::write(dir.path().join("logged.md"), "x").unwrap();
        fs::write(dir.path().join("node_modules/dep.md"), "x").unwrap();
        let filter = ScanFilter::new(
            ["node_modules".to_string()].into_iter().collect(),
            ExtensionSet::default(),
        );

        let tracked: HashSet<String> = [
            "docs/staged.md",
            "logged.md",
            "node_modules/dep.md",
            "deleted.md",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let merged = merge_versioned(
            dir.path(),
            &filter,
            vec![],
            vec![("logged.md".to_string(), revision("r1"))],
            vec![],
            &tracked,
        );

        let mut summary: Vec<(&str, bool)> =
            merged.iter().map(|r| (r.path.as_str(), r.tracked)).collect();
        summary.sort();
        assert_eq!(summary, vec![("docs/staged.md", false), ("logged.md", true)]);
    }

    #[test]
    fn test_merge_uses_mtime_not_commit_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "x").unwrap();
        let filter = ScanFilter::new(Default::default(), ExtensionSet::default());
        let rev = revision("r1");
        let tracked: HashSet<String> = ["a.md".to_string()].into_iter().collect();
        let merged = merge_versioned(
            dir.path(),
            &filter,
            vec![],
            vec![("a.md".to_string(), rev.clone())],
            vec![],
            &tracked,
        );
        assert_ne!(merged[0].timestamp, rev.timestamp);
        assert_eq!(Some(merged[0].timestamp), modified_at(&dir.path().join("a.md")));
    }
}
