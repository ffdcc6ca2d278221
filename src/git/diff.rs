//! Per-file diffs of a single revision.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::context::{GitBinding, RepositoryContext};
use crate::git::Git;
use crate::git::log::{LOG_FORMAT, RevisionSummary, parse_header};
use crate::locator::child_repository_for;

/// Kind of a line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Header,
    Add,
    Delete,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub kind: LineKind,
    /// Line text without the leading `+`, `-` or space.
    pub content: String,
    pub old_line_no: Option<u32>,
    pub new_line_no: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffHunk {
    pub header: String,
    /// Starts with the `@@` header line itself.
    pub lines: Vec<DiffLine>,
}

/// The change one revision made to one file, against its first parent (or
/// the empty tree for a root revision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub revision_id: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Root-relative path as requested.
    pub path: String,
    pub hunks: Vec<DiffHunk>,
    /// Unified diff body from the first `@@` line on.
    pub raw_diff: String,
}

/// Whether `id` looks like a full or abbreviated revision id: 4 to 40 hex
/// digits. Anything else is refused before it reaches git.
pub fn is_revision_id(id: &str) -> bool {
    (4..=40).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Old and new start lines of a `@@ -a,b +c,d @@` header.
fn hunk_start(header: &str) -> Option<(u32, u32)> {
    let rest = header.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let start = |range: &str| range.split(',').next()?.parse::<u32>().ok();
    Some((start(old)?, start(new)?))
}

/// Split a unified diff body into hunks with line numbers.
///
/// Lines before the first `@@` header are ignored, as are `\ No newline at
/// end of file` markers. A header that cannot be parsed keeps the previous
/// line counters.
pub fn parse_hunks(raw: &str) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current: Option<DiffHunk> = None;
    let mut old_no = 0u32;
    let mut new_no = 0u32;

    for line in raw.lines() {
        if line.starts_with("@@") {
            hunks.extend(current.take());
            if let Some((old, new)) = hunk_start(line) {
                old_no = old;
                new_no = new;
            }
            current = Some(DiffHunk {
                header: line.to_string(),
                lines: vec![DiffLine {
                    kind: LineKind::Header,
                    content: line.to_string(),
                    old_line_no: None,
                    new_line_no: None,
                }],
            });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        let (kind, content, old_line_no, new_line_no) = if let Some(text) = line.strip_prefix('+') {
            new_no += 1;
            (LineKind::Add, text, None, Some(new_no - 1))
        } else if let Some(text) = line.strip_prefix('-') {
            old_no += 1;
            (LineKind::Delete, text, Some(old_no - 1), None)
        } else if line.is_empty() || line.starts_with(' ') {
            old_no += 1;
            new_no += 1;
            (
                LineKind::Context,
                line.get(1..).unwrap_or_default(),
                Some(old_no - 1),
                Some(new_no - 1),
            )
        } else {
            continue;
        };
        hunk.lines.push(DiffLine {
            kind,
            content: content.to_string(),
            old_line_no,
            new_line_no,
        });
    }

    hunks.extend(current);
    hunks
}

/// Split `git show` output into the revision header and the diff body.
///
/// Returns `None` when the header is missing or the revision did not touch
/// the path (no `diff --git` section).
pub fn parse_show(output: &str) -> Option<(RevisionSummary, String)> {
    let (first, rest) = output.split_once('\n').unwrap_or((output, ""));
    let revision = parse_header(first)?;
    if !rest.lines().any(|line| line.starts_with("diff --git ")) {
        return None;
    }
    let raw = match rest.find("\n@@") {
        Some(at) => rest[at + 1..].to_string(),
        None => String::new(),
    };
    Some((revision, raw))
}

async fn diff_in(
    git: &Git,
    binding: &GitBinding,
    path: &str,
    revision: &str,
) -> Option<(RevisionSummary, String)> {
    let repo_path = binding.to_repo_relative(path);
    let stdout = git
        .run(
            binding.work_tree(),
            &[
                "show",
                "-m",
                "--first-parent",
                "--no-color",
                "--no-ext-diff",
                LOG_FORMAT,
                revision,
                "--",
                &repo_path,
            ],
        )
        .await;
    match stdout {
        Ok(stdout) => parse_show(&stdout),
        Err(err) => {
            debug!(revision, path, error = %err, "diff lookup failed");
            None
        }
    }
}

/// The change `revision` made to `path` (root-relative).
///
/// `None` when the revision id is malformed or unknown, the revision did not
/// touch the path, or the path is outside any repository. In a container
/// root the lookup is delegated to the child repository that owns the path.
pub async fn file_diff(context: &RepositoryContext, path: &str, revision: &str) -> Option<FileDiff> {
    if !is_revision_id(revision) {
        return None;
    }
    let (summary, raw_diff) = match context.binding() {
        Some(binding) => diff_in(context.git(), binding, path, revision).await?,
        None => {
            let (child, child_path) = child_repository_for(context, path).await?;
            let binding = child.binding()?;
            diff_in(child.git(), binding, &child_path, revision).await?
        }
    };
    Some(FileDiff {
        revision_id: summary.revision_id,
        message: summary.message,
        author: summary.author,
        timestamp: summary.timestamp,
        path: path.to_string(),
        hunks: parse_hunks(&raw_diff),
        raw_diff,
    })
}
