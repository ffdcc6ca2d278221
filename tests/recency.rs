//! End-to-end feed tests against real git repositories.
//!
//! Every test builds its fixture in a temp directory with the `git` binary and
//! returns early when git is not installed.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use docfeed::aggregate::{RecencyAggregator, collect};
use docfeed::broadcast::{Broadcaster, Notification};
use docfeed::cache::{NoopCache, TtlCache};
use docfeed::config::default_exclude_dirs;
use docfeed::context::RepositoryContext;
use docfeed::git::Git;
use docfeed::git::diff::{LineKind, file_diff};
use docfeed::git::log::{history, last_commit, last_commits_batch};
use docfeed::git::status::{FileStatus, head_revision, is_dirty, working_dir_status};
use docfeed::record::{ChangeRecord, ExtensionSet};
use docfeed::watcher::filter::EventFilter;
use docfeed::watcher::{Timing, WatchedRepository, spawn_reactor};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=Tester",
            "-c",
            "user.email=tester@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn age(dir: &Path, rel: &str, by: Duration) {
    let file = fs::File::options().write(true).open(dir.join(rel)).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
}

async fn open(dir: &Path) -> RepositoryContext {
    RepositoryContext::open(dir, default_exclude_dirs(), true, Git::default())
        .await
        .unwrap()
}

fn summary(records: &[ChangeRecord]) -> Vec<(&str, bool)> {
    records.iter().map(|r| (r.path.as_str(), r.tracked)).collect()
}

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Versioned roots
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_untracked_newer_file_ranks_above_committed_one() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "a.md", "# a");
    commit_all(dir.path(), "add a");
    age(dir.path(), "a.md", 2 * DAY);
    write(dir.path(), "b.md", "# b");

    let context = open(dir.path()).await;
    let feed = collect(&context, 10, &ExtensionSet::default()).await;

    assert_eq!(summary(&feed), vec![("b.md", false), ("a.md", true)]);
    let a = &feed[1];
    assert_eq!(a.author, "Tester");
    assert_eq!(a.message, "add a");
    assert_eq!(a.revision_id.len(), 40);
    assert!(feed[0].author.is_empty() && feed[0].revision_id.is_empty());
}

#[tokio::test]
async fn test_intent_to_add_and_staged_files_are_untracked() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "base.md", "x");
    commit_all(dir.path(), "base");
    age(dir.path(), "base.md", DAY);

    write(dir.path(), "ita.md", "x");
    git(dir.path(), &["add", "-N", "ita.md"]);
    write(dir.path(), "docs/staged.md", "x");
    git(dir.path(), &["add", "docs/staged.md"]);

    let context = open(dir.path()).await;
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    let mut found = summary(&feed);
    found.sort();
    assert_eq!(
        found,
        vec![("base.md", true), ("docs/staged.md", false), ("ita.md", false)]
    );
}

#[tokio::test]
async fn test_commit_moves_file_from_untracked_to_tracked() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "note.md", "x");

    let context = open(dir.path()).await;
    let aggregator = RecencyAggregator::new(Arc::new(TtlCache::new(Duration::from_secs(60))));
    let before = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&before), vec![("note.md", false)]);

    commit_all(dir.path(), "add note");
    // still cached until invalidated
    let cached = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert!(Arc::ptr_eq(&before, &cached));

    aggregator.invalidate(&context);
    let after = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&after), vec![("note.md", true)]);
    assert_eq!(after[0].message, "add note");
}

#[tokio::test]
async fn test_recreated_file_after_deletion_is_untracked() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "keep.md", "x");
    write(dir.path(), "note.md", "x");
    commit_all(dir.path(), "add both");
    git(dir.path(), &["rm", "-q", "note.md"]);
    git(dir.path(), &["commit", "-q", "-m", "remove note"]);
    write(dir.path(), "note.md", "back again");

    let context = open(dir.path()).await;
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    let mut found = summary(&feed);
    found.sort();
    assert_eq!(found, vec![("keep.md", true), ("note.md", false)]);
    let note = feed.iter().find(|r| r.path == "note.md").unwrap();
    assert!(note.message.is_empty() && note.author.is_empty() && note.revision_id.is_empty());
}

#[tokio::test]
async fn test_file_removed_from_index_is_untracked() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "a.md", "x");
    commit_all(dir.path(), "add a");
    git(dir.path(), &["rm", "-q", "--cached", "a.md"]);

    let context = open(dir.path()).await;
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&feed), vec![("a.md", false)]);
    assert!(feed[0].message.is_empty());
}

#[tokio::test]
async fn test_excluded_hidden_and_foreign_files_never_appear() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "keep.md", "x");
    write(dir.path(), "node_modules/pkg/README.md", "x");
    write(dir.path(), "build/out.md", "x");
    write(dir.path(), ".obsidian/cache.md", "x");
    write(dir.path(), "code.rs", "x");
    write(dir.path(), ".hidden.md", "x");
    commit_all(dir.path(), "everything");

    let context = open(dir.path()).await;
    let feed = collect(&context, 50, &ExtensionSet::default()).await;
    let mut paths: Vec<&str> = feed.iter().map(|r| r.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec![".hidden.md", "keep.md"]);
}

#[tokio::test]
async fn test_limit_and_extension_set() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    for (i, name) in ["one.md", "two.md", "three.txt", "four.md"].iter().enumerate() {
        write(dir.path(), name, "x");
        age(dir.path(), name, Duration::from_secs(60 * (i as u64 + 1)));
    }

    let context = open(dir.path()).await;
    let top = collect(&context, 2, &ExtensionSet::default()).await;
    assert_eq!(summary(&top), vec![("one.md", false), ("two.md", false)]);

    let txt = collect(&context, 10, &ExtensionSet::new(["txt"])).await;
    assert_eq!(summary(&txt), vec![("three.txt", false)]);

    assert!(collect(&context, 0, &ExtensionSet::default()).await.is_empty());
    assert!(collect(&context, 10, &ExtensionSet::new(Vec::<String>::new())).await.is_empty());
}

#[tokio::test]
async fn test_subdirectory_root_is_scoped_and_relative() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "README.md", "x");
    write(dir.path(), "docs/guide.md", "x");
    commit_all(dir.path(), "docs");
    write(dir.path(), "docs/draft.md", "x");
    age(dir.path(), "docs/guide.md", DAY);

    let context = open(&dir.path().join("docs")).await;
    assert!(context.is_versioned());
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&feed), vec![("draft.md", false), ("guide.md", true)]);

    let revisions = history(&context, "guide.md", 10).await;
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].message, "docs");
}

#[tokio::test]
async fn test_repeated_reads_within_ttl_are_identical() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    for name in ["a.md", "b.md", "c/d.md"] {
        write(dir.path(), name, "x");
    }
    commit_all(dir.path(), "init");

    let context = open(dir.path()).await;
    let aggregator = RecencyAggregator::new(Arc::new(TtlCache::new(Duration::from_secs(60))));
    let first = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    write(dir.path(), "e.md", "x");
    let second = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(first, second);

    let uncached = RecencyAggregator::new(Arc::new(NoopCache));
    let fresh = uncached.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(fresh.len(), 4);
}

#[tokio::test]
async fn test_index_change_seen_by_watcher_refreshes_cached_feed() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "note.md", "x");

    let context = open(dir.path()).await;
    let cache = Arc::new(TtlCache::new(Duration::from_secs(600)));
    let aggregator = RecencyAggregator::new(cache.clone());
    let broadcaster = Broadcaster::new();
    let (_, mut notifications) = broadcaster.register_channel(8);
    let (tx, handle) = spawn_reactor(
        vec![WatchedRepository::new(None, context.root())],
        EventFilter::new(ExtensionSet::default(), default_exclude_dirs()),
        Timing {
            quiet_period: Duration::from_millis(50),
            max_wait: Duration::from_millis(500),
        },
        cache,
        broadcaster,
    );

    let before = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&before), vec![("note.md", false)]);

    commit_all(dir.path(), "add note");
    tx.send(vec![context.root().join(".git").join("index")]).unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("batch flushed")
        .expect("broadcaster alive");
    assert_eq!(
        batch,
        Notification::files_changed(None, vec![".git/index".to_string()])
    );

    let after = aggregator.aggregate(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&after), vec![("note.md", true)]);
    assert_eq!(after[0].message, "add note");
    handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Container and plain roots
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_container_root_merges_child_repositories() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for (child, doc) in [("alpha", "a.md"), ("beta", "b.md")] {
        init_repo(&root.join(child));
        write(&root.join(child), doc, "x");
        commit_all(&root.join(child), &format!("{child} doc"));
    }
    write(root, "top.md", "x");
    write(root, "plain/p.md", "x");
    write(root, "node_modules/skip.md", "x");

    let context = open(root).await;
    if context.is_versioned() {
        return;
    }
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    let mut found = summary(&feed);
    found.sort();
    assert_eq!(
        found,
        vec![
            ("alpha/a.md", true),
            ("beta/b.md", true),
            ("plain/p.md", false),
            ("top.md", false),
        ]
    );
    let alpha = feed.iter().find(|r| r.path == "alpha/a.md").unwrap();
    assert_eq!(alpha.message, "alpha doc");

    let diff = file_diff(&context, "alpha/a.md", &alpha.revision_id).await.unwrap();
    assert_eq!(diff.path, "alpha/a.md");
    assert_eq!(diff.message, "alpha doc");
    assert!(file_diff(&context, "top.md", &alpha.revision_id).await.is_none());

    assert_eq!(history(&context, "alpha/a.md", 5).await.len(), 1);
    assert!(history(&context, "top.md", 5).await.is_empty());
    assert!(history(&context, "plain/p.md", 5).await.is_empty());
    assert_eq!(
        last_commit(&context, "beta/b.md").await.map(|r| r.message),
        Some("beta doc".to_string())
    );
}

#[tokio::test]
async fn test_child_repositories_do_not_leak_into_each_other() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    init_repo(&root.join("one"));
    init_repo(&root.join("two"));
    write(&root.join("one"), "same.md", "x");
    commit_all(&root.join("one"), "in one");
    write(&root.join("two"), "same.md", "x");

    let context = open(root).await;
    if context.is_versioned() {
        return;
    }
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    let mut found = summary(&feed);
    found.sort();
    assert_eq!(found, vec![("one/same.md", true), ("two/same.md", false)]);
}

#[tokio::test]
async fn test_plain_directory_is_all_untracked() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.md", "x");
    write(dir.path(), "sub/b.md", "x");
    age(dir.path(), "a.md", DAY);

    let context = RepositoryContext::open(dir.path(), BTreeSet::new(), true, Git::default())
        .await
        .unwrap();
    if context.is_versioned() {
        return;
    }
    let feed = collect(&context, 10, &ExtensionSet::default()).await;
    assert_eq!(summary(&feed), vec![("sub/b.md", false), ("a.md", false)]);
    assert!(history(&context, "a.md", 10).await.is_empty());
    assert!(working_dir_status(&context).await.is_empty());
    assert_eq!(head_revision(&context).await, None);
}

// ---------------------------------------------------------------------------
// Per-file lookups and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_last_commits_batch_matches_each_path_once() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "a.md", "1");
    write(dir.path(), "b.md", "1");
    commit_all(dir.path(), "first");
    write(dir.path(), "a.md", "2");
    commit_all(dir.path(), "second");

    let context = open(dir.path()).await;
    let paths = vec!["a.md".to_string(), "b.md".to_string(), "never.md".to_string()];
    let found = last_commits_batch(&context, &paths).await;
    assert_eq!(found.len(), 2);
    assert_eq!(found["a.md"].message, "second");
    assert_eq!(found["b.md"].message, "first");
    assert_eq!(history(&context, "a.md", 10).await.len(), 2);
    assert_eq!(history(&context, "a.md", 1).await.len(), 1);
}

#[tokio::test]
async fn test_file_diff_against_parent_and_root_revision() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    write(dir.path(), "doc.md", "one\ntwo\n");
    commit_all(dir.path(), "first");
    write(dir.path(), "doc.md", "one\nthree\n");
    commit_all(dir.path(), "second");
    write(dir.path(), "other.md", "x");
    commit_all(dir.path(), "third");

    let context = open(dir.path()).await;
    let revisions = history(&context, "doc.md", 10).await;
    assert_eq!(revisions.len(), 2);

    let second = file_diff(&context, "doc.md", &revisions[0].revision_id[..8])
        .await
        .unwrap();
    assert_eq!(second.revision_id, revisions[0].revision_id);
    assert_eq!(second.message, "second");
    assert_eq!(second.author, "Tester");
    assert_eq!(second.hunks.len(), 1);
    let changed: Vec<(LineKind, &str)> = second.hunks[0]
        .lines
        .iter()
        .filter(|l| matches!(l.kind, LineKind::Add | LineKind::Delete))
        .map(|l| (l.kind, l.content.as_str()))
        .collect();
    assert_eq!(changed, vec![(LineKind::Delete, "two"), (LineKind::Add, "three")]);
    assert!(second.raw_diff.starts_with("@@"));

    let first = file_diff(&context, "doc.md", &revisions[1].revision_id).await.unwrap();
    let added: Vec<(&str, Option<u32>)> = first.hunks[0]
        .lines
        .iter()
        .filter(|l| l.kind == LineKind::Add)
        .map(|l| (l.content.as_str(), l.new_line_no))
        .collect();
    assert_eq!(added, vec![("one", Some(1)), ("two", Some(2))]);

    let third = last_commit(&context, "other.md").await.unwrap();
    assert!(file_diff(&context, "doc.md", &third.revision_id).await.is_none());
    assert!(file_diff(&context, "doc.md", "HEAD").await.is_none());
    assert!(file_diff(&context, "doc.md", "deadbeef").await.is_none());
}

#[tokio::test]
async fn test_working_dir_status_and_head() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let context = open(dir.path()).await;
    assert_eq!(head_revision(&context).await, None);

    write(dir.path(), "a.md", "1");
    write(dir.path(), "gone.md", "1");
    commit_all(dir.path(), "first");
    assert!(!is_dirty(&context).await);

    write(dir.path(), "a.md", "2");
    fs::remove_file(dir.path().join("gone.md")).unwrap();
    write(dir.path(), "new/n.md", "1");

    let status = working_dir_status(&context).await;
    assert_eq!(status.get("a.md"), Some(&FileStatus::Modified));
    assert_eq!(status.get("gone.md"), Some(&FileStatus::Deleted));
    assert_eq!(status.get("new/n.md"), Some(&FileStatus::Untracked));
    assert!(is_dirty(&context).await);
    assert!(head_revision(&context).await.is_some_and(|h| h.len() >= 7));
}
