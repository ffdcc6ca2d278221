use std::collections::BTreeSet;

use crate::fs::CONTROL_DIR;
use crate::record::ExtensionSet;

/// File names directly inside a control directory whose change means the
/// repository state moved (commit, checkout, merge, rebase, cherry-pick).
pub const STATE_MARKERS: &[&str] = &["index", "HEAD", "MERGE_HEAD", "REBASE_HEAD", "CHERRY_PICK_HEAD"];

/// Why an event path made it through the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// A document matching the watched extensions.
    Content,
    /// A git state marker; the feed cache must be flushed.
    StateMarker,
}

/// True if `rel` is `<...>/.git/<marker>` with the marker exactly one segment
/// below the control directory.
pub fn is_state_marker(rel: &str) -> bool {
    let parts: Vec<&str> = rel.split('/').collect();
    match parts.iter().position(|part| *part == CONTROL_DIR) {
        Some(idx) => parts.len() == idx + 2 && STATE_MARKERS.contains(&parts[idx + 1]),
        None => false,
    }
}

/// Decides which filesystem events reach the batching state machine.
#[derive(Debug, Clone)]
pub struct EventFilter {
    extensions: ExtensionSet,
    excluded: BTreeSet<String>,
}

impl EventFilter {
    pub fn new(extensions: ExtensionSet, excluded: BTreeSet<String>) -> Self {
        Self {
            extensions,
            excluded,
        }
    }

    /// Classify a repository-relative, `/`-separated path.
    ///
    /// Everything under a control directory is rejected except state markers
    /// one level down. Outside it, no directory component may be excluded and
    /// the file must carry a watched extension.
    pub fn classify(&self, rel: &str) -> Option<Relevance> {
        let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();
        let (file_name, dirs) = parts.split_last()?;

        if parts.contains(&CONTROL_DIR) {
            return is_state_marker(rel).then_some(Relevance::StateMarker);
        }
        if dirs.iter().any(|dir| self.excluded.contains(*dir)) {
            return None;
        }
        self.extensions
            .matches(file_name)
            .then_some(Relevance::Content)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(
            ExtensionSet::default(),
            crate::config::default_exclude_dirs(),
        )
    }
}
