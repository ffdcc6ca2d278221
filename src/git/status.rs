use std::collections::BTreeMap;

use serde::Serialize;

use crate::context::{GitBinding, RepositoryContext};

/// Working-directory state of a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Modified,
    Added,
    Deleted,
    Untracked,
}

/// `(xy, path)` pairs from `git status --porcelain=v1` output. Renames report
/// the new path; quoted paths are unquoted.
fn porcelain_entries(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output.lines().filter_map(|line| {
        let xy = line.get(..2)?;
        let mut path = line.get(3..)?.trim();
        if let Some((_, renamed_to)) = path.split_once(" -> ") {
            path = renamed_to;
        }
        let path = path
            .strip_prefix('"')
            .and_then(|p| p.strip_suffix('"'))
            .unwrap_or(path);
        (!path.is_empty()).then_some((xy, path))
    })
}

/// Map porcelain output to root-relative statuses.
pub fn parse_status(output: &str, binding: &GitBinding) -> BTreeMap<String, FileStatus> {
    porcelain_entries(output)
        .filter_map(|(xy, repo_path)| {
            let rel = binding.to_root_relative(repo_path)?;
            let status = if xy == "??" {
                FileStatus::Untracked
            } else if xy.contains('D') {
                FileStatus::Deleted
            } else if xy.contains('A') {
                FileStatus::Added
            } else {
                FileStatus::Modified
            };
            Some((rel.to_string(), status))
        })
        .collect()
}

/// Root-relative paths staged with `git add -N`.
///
/// These sit in the index (so `ls-files` lists them) but have no revision
/// yet; porcelain shows them as `" A"`.
pub fn intent_to_add(output: &str, binding: &GitBinding) -> Vec<String> {
    porcelain_entries(output)
        .filter(|(xy, _)| *xy == " A")
        .filter_map(|(_, repo_path)| binding.to_root_relative(repo_path))
        .map(str::to_string)
        .collect()
}

/// Raw `git status --porcelain=v1 -uno` output. Skipping untracked
/// enumeration keeps this cheap; intent-to-add entries still appear because
/// they are in the index.
pub async fn status_snapshot(context: &RepositoryContext) -> String {
    let Some(binding) = context.binding() else {
        return String::new();
    };
    context
        .git()
        .run_or_empty(binding.work_tree(), &["status", "--porcelain=v1", "-uno"])
        .await
}

/// Status of every changed or untracked path under the context root.
pub async fn working_dir_status(context: &RepositoryContext) -> BTreeMap<String, FileStatus> {
    let Some(binding) = context.binding() else {
        return BTreeMap::new();
    };
    let stdout = context
        .git()
        .run_or_empty(binding.work_tree(), &["status", "--porcelain=v1", "-uall"])
        .await;
    parse_status(&stdout, binding)
}

/// Short hash of `HEAD`, or `None` when unbound or there are no commits yet.
pub async fn head_revision(context: &RepositoryContext) -> Option<String> {
    let binding = context.binding()?;
    let stdout = context
        .git()
        .run(binding.work_tree(), &["rev-parse", "--short", "HEAD"])
        .await
        .ok()?;
    let head = stdout.trim();
    (!head.is_empty()).then(|| head.to_string())
}

/// True if there are staged, unstaged or untracked changes.
pub async fn is_dirty(context: &RepositoryContext) -> bool {
    let Some(binding) = context.binding() else {
        return false;
    };
    match context
        .git()
        .run(binding.work_tree(), &["status", "--porcelain"])
        .await
    {
        Ok(stdout) => !stdout.trim().is_empty(),
        Err(_) => false,
    }
}
