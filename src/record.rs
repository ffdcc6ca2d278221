use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::git::log::RevisionSummary;

/// One entry of the recently-changed feed.
///
/// `timestamp` is always the filesystem modification time so tracked and
/// untracked entries rank on the same clock. `author`, `message` and
/// `revision_id` are only filled in for tracked entries with a matching log
/// entry; they are empty strings otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub revision_id: String,
    pub tracked: bool,
}

impl ChangeRecord {
    /// A record for a file with no revision history.
    pub fn untracked(path: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            path,
            timestamp,
            author: String::new(),
            message: String::new(),
            revision_id: String::new(),
            tracked: false,
        }
    }

    /// A record for a file whose most recent revision is `revision`.
    pub fn tracked(path: String, timestamp: DateTime<Utc>, revision: &RevisionSummary) -> Self {
        let author = if revision.author.is_empty() {
            "Unknown".to_string()
        } else {
            revision.author.clone()
        };
        Self {
            path,
            timestamp,
            author,
            message: revision.message.clone(),
            revision_id: revision.revision_id.clone(),
            tracked: true,
        }
    }

    /// Re-root the record under `<prefix>/`.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.path = format!("{prefix}/{}", self.path);
        self
    }
}

/// Modification time of `path` if it is a regular file.
///
/// One `stat` call answers existence, file type and mtime together.
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// Normalised set of file-name suffixes (lowercase, leading dot, sorted).
///
/// Used both as a filter and as part of the cache key, so two requests for
/// `["MD"]` and `[".md"]` share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionSet(Vec<String>);

impl ExtensionSet {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalised: Vec<String> = extensions
            .into_iter()
            .filter_map(|ext| {
                let ext = ext.as_ref().trim().to_lowercase();
                if ext.is_empty() || ext == "." {
                    None
                } else if ext.starts_with('.') {
                    Some(ext)
                } else {
                    Some(format!(".{ext}"))
                }
            })
            .collect();
        normalised.sort();
        normalised.dedup();
        Self(normalised)
    }

    /// True if `name` (a file name or relative path) ends in one of the suffixes.
    pub fn matches(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.0.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::new([".md"])
    }
}
