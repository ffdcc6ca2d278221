use std::collections::HashSet;

use crate::context::{GitBinding, RepositoryContext};

/// Every path the git index currently knows about, relative to the context root.
///
/// Built from `git ls-files`, so cost follows index size rather than tree
/// size. Unbound contexts and failed invocations both give an empty set: the
/// caller then treats everything it finds as untracked.
pub async fn tracked_set(context: &RepositoryContext) -> HashSet<String> {
    let Some(binding) = context.binding() else {
        return HashSet::new();
    };
    let stdout = context
        .git()
        .run_or_empty(binding.work_tree(), &["ls-files", "-z"])
        .await;
    parse_tracked(&stdout, binding)
}

/// Parse NUL-separated `git ls-files -z` output, keeping only entries under
/// the binding's root.
pub fn parse_tracked(stdout: &str, binding: &GitBinding) -> HashSet<String> {
    stdout
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| binding.to_root_relative(entry))
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
