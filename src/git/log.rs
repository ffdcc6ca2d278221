use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::context::{GitBinding, RepositoryContext};
use crate::git::Git;
use crate::locator::child_repository_for;

/// `git log` header format: id, author name, author email, unix time, subject,
/// NUL-separated so subjects may contain anything but a newline.
pub const LOG_FORMAT: &str = "--format=%H%x00%an%x00%ae%x00%ct%x00%s";

/// Revisions scanned by [`last_commits_batch`] before giving up on a path.
pub const BATCH_WINDOW: usize = 500;

/// Revisions scanned when building the recently-changed feed.
pub const RECENT_WINDOW: usize = 200;

/// Summary of one revision as shown in history views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionSummary {
    pub revision_id: String,
    pub author: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// One line of `git log --name-only` output.
#[derive(Debug, PartialEq, Eq)]
pub enum LogLine<'a> {
    Revision(RevisionSummary),
    /// A header line that failed to parse. Paths following it are not
    /// attributed to any revision.
    Malformed,
    Path(&'a str),
    Blank,
}

pub fn classify_line(line: &str) -> LogLine<'_> {
    if line.contains('\0') {
        return match parse_header(line) {
            Some(revision) => LogLine::Revision(revision),
            None => LogLine::Malformed,
        };
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LogLine::Blank
    } else {
        LogLine::Path(trimmed)
    }
}

/// Parse a [`LOG_FORMAT`] header line.
pub fn parse_header(line: &str) -> Option<RevisionSummary> {
    let mut parts = line.splitn(5, '\0');
    let revision_id = parts.next()?.trim();
    let author = parts.next()?;
    let author_email = parts.next()?;
    let secs: i64 = parts.next()?.trim().parse().ok()?;
    let message = parts.next()?;
    if revision_id.is_empty() {
        return None;
    }
    Some(RevisionSummary {
        revision_id: revision_id.to_string(),
        author: author.to_string(),
        author_email: author_email.to_string(),
        timestamp: DateTime::from_timestamp(secs, 0)?,
        message: message.to_string(),
    })
}

/// Parse plain `git log` output (no file lists), skipping malformed lines.
pub fn parse_history(output: &str) -> Vec<RevisionSummary> {
    output.lines().filter_map(parse_header).collect()
}

/// Most recent revision for every root-relative path touched in `output`
/// (a `--name-only` log), in first-seen order. Log order is newest first, so
/// the first sighting of a path is its latest change.
pub fn latest_per_path(output: &str, binding: &GitBinding) -> Vec<(String, RevisionSummary)> {
    let mut seen = HashSet::new();
    let mut latest = Vec::new();
    let mut current: Option<RevisionSummary> = None;

    for line in output.lines() {
        match classify_line(line) {
            LogLine::Revision(revision) => current = Some(revision),
            LogLine::Malformed => current = None,
            LogLine::Path(repo_path) => {
                let Some(revision) = &current else { continue };
                let Some(rel) = binding.to_root_relative(repo_path) else {
                    continue;
                };
                if !rel.is_empty() && seen.insert(rel.to_string()) {
                    latest.push((rel.to_string(), revision.clone()));
                }
            }
            LogLine::Blank => {}
        }
    }

    latest
}

/// Raw `--name-only` log of the last [`RECENT_WINDOW`] revisions.
pub async fn recent_log(git: &Git, binding: &GitBinding) -> String {
    let max_count = format!("--max-count={RECENT_WINDOW}");
    git.run_or_empty(
        binding.work_tree(),
        &["log", &max_count, LOG_FORMAT, "--name-only"],
    )
    .await
}

async fn history_in(
    git: &Git,
    binding: &GitBinding,
    path: &str,
    limit: usize,
) -> Vec<RevisionSummary> {
    let repo_path = binding.to_repo_relative(path);
    let max_count = format!("--max-count={limit}");
    let stdout = git
        .run_or_empty(
            binding.work_tree(),
            &["log", &max_count, LOG_FORMAT, "--", &repo_path],
        )
        .await;
    parse_history(&stdout)
}

/// Revision history of `path` (root-relative), newest first, at most `limit`
/// entries.
///
/// In a container root the lookup is delegated to the child repository that
/// owns the path. Files with no history, or outside any repository, give an
/// empty list.
pub async fn history(context: &RepositoryContext, path: &str, limit: usize) -> Vec<RevisionSummary> {
    if limit == 0 {
        return Vec::new();
    }
    if let Some(binding) = context.binding() {
        return history_in(context.git(), binding, path, limit).await;
    }
    match child_repository_for(context, path).await {
        Some((child, child_path)) => match child.binding() {
            Some(binding) => history_in(child.git(), binding, &child_path, limit).await,
            None => Vec::new(),
        },
        None => Vec::new(),
    }
}

/// Most recent revision touching `path`.
pub async fn last_commit(context: &RepositoryContext, path: &str) -> Option<RevisionSummary> {
    history(context, path, 1).await.into_iter().next()
}

/// Most recent revision for each of `paths` from a single log stream.
///
/// The log is streamed once over the last [`BATCH_WINDOW`] revisions and
/// the process is stopped as soon as every path has been matched. Paths not
/// touched within the window are simply absent from the result.
pub async fn last_commits_batch(
    context: &RepositoryContext,
    paths: &[String],
) -> HashMap<String, RevisionSummary> {
    if paths.is_empty() {
        return HashMap::new();
    }

    let Some(binding) = context.binding() else {
        let mut found = HashMap::new();
        for path in paths {
            if let Some((child, child_path)) = child_repository_for(context, path).await
                && let Some(binding) = child.binding()
                && let Some(revision) = history_in(child.git(), binding, &child_path, 1)
                    .await
                    .into_iter()
                    .next()
            {
                found.insert(path.clone(), revision);
            }
        }
        return found;
    };

    let wanted: HashMap<String, &String> = paths
        .iter()
        .map(|p| (binding.to_repo_relative(p), p))
        .collect();
    let mut found: HashMap<String, RevisionSummary> = HashMap::new();
    let mut current: Option<RevisionSummary> = None;
    let max_count = format!("--max-count={BATCH_WINDOW}");

    let outcome = context
        .git()
        .stream_lines(
            binding.work_tree(),
            &["log", &max_count, LOG_FORMAT, "--name-only"],
            |line| {
                match classify_line(line) {
                    LogLine::Revision(revision) => current = Some(revision),
                    LogLine::Malformed => current = None,
                    LogLine::Path(repo_path) => {
                        if let Some(revision) = &current
                            && let Some(original) = wanted.get(repo_path)
                            && !found.contains_key(original.as_str())
                        {
                            found.insert((*original).clone(), revision.clone());
                            if found.len() == wanted.len() {
                                return ControlFlow::Break(());
                            }
                        }
                    }
                    LogLine::Blank => {}
                }
                ControlFlow::Continue(())
            },
        )
        .await;

    if let Err(err) = outcome {
        debug!(error = %err, matched = found.len(), "batched log lookup ended early");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn header(id: &str, author: &str, ts: i64, msg: &str) -> String {
        format!("{id}\0{author}\0{author}@example.com\0{ts}\0{msg}")
    }

    #[test]
    fn test_parse_header_fields() {
        let rev = parse_header(&header("abc123", "Ada", 1_700_000_000, "fix: a\0b")).unwrap();
        assert_eq!(rev.revision_id, "abc123");
        assert_eq!(rev.author, "Ada");
        assert_eq!(rev.author_email, "Ada@example.com");
        assert_eq!(rev.timestamp.timestamp(), 1_700_000_000);
        // splitn(5) keeps NULs inside the subject
        assert_eq!(rev.message, "fix: a\0b");
    }

    #[test]
    fn test_parse_header_rejects_malformed() {
        assert!(parse_header("abc\0Ada\0mail").is_none());
        assert!(parse_header("abc\0Ada\0mail\0notanumber\0msg").is_none());
        assert!(parse_header("\0Ada\0mail\01\0msg").is_none());
    }

    #[test]
    fn test_latest_per_path_keeps_newest_and_skips_malformed() {
        let output = [
            header("c3", "Cy", 300, "third"),
            String::new(),
            "docs/a.md".into(),
            header("c2", "Bo", 200, "second"),
            String::new(),
            "docs/a.md".into(),
            "b.md".into(),
            "broken\0header".into(),
            "orphan.md".into(),
            header("c1", "Al", 100, "first"),
            "c.md".into(),
        ]
        .join("\n");

        let binding = GitBinding::new(PathBuf::from("/r"), Path::new("/r"));
        let latest = latest_per_path(&output, &binding);
        let summary: Vec<(&str, &str)> = latest
            .iter()
            .map(|(p, r)| (p.as_str(), r.revision_id.as_str()))
            .collect();
        assert_eq!(summary, vec![("docs/a.md", "c3"), ("b.md", "c2"), ("c.md", "c1")]);
    }

    #[test]
    fn test_latest_per_path_respects_prefix() {
        let output = [header("c1", "Al", 100, "m"), "docs/a.md".into(), "README.md".into()].join("\n");
        let binding = GitBinding::new(PathBuf::from("/r"), Path::new("/r/docs"));
        let latest = latest_per_path(&output, &binding);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0, "a.md");
    }

    #[test]
    fn test_parse_history_skips_garbage() {
        let output = format!(
            "{}\n\ngarbage line\n{}\n",
            header("c2", "Bo", 200, "second"),
            header("c1", "Al", 100, "first")
        );
        let revisions = parse_history(&output);
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].revision_id, "c2");
    }
}
