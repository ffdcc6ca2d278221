use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::git::Git;
use crate::record::ExtensionSet;
use crate::watcher::Timing;
use crate::watcher::filter::EventFilter;

/// File name looked up in the served root.
pub const CONFIG_FILE: &str = "docfeed.toml";

/// Directory names never listed, scanned or watched unless overridden.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    // version control
    ".git",
    ".hg",
    ".svn",
    // dependencies
    "node_modules",
    ".venv",
    "venv",
    // python caches
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".ruff_cache",
    ".egg-info",
    ".tox",
    ".nox",
    // build outputs
    "dist",
    "build",
    ".cache",
];

pub fn default_exclude_dirs() -> BTreeSet<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect()
}

/// Configuration loaded from `docfeed.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocfeedConfig {
    /// Directory names excluded from listings, scans and the watcher.
    /// Replaces the built-in list when present.
    pub exclude_dirs: BTreeSet<String>,
    /// Show dot-entries in directory listings.
    pub show_hidden: bool,
    /// Document suffixes for the feed and the watcher.
    pub extensions: Vec<String>,
    pub git_timeout_secs: u64,
    pub host: String,
    pub port: u16,
    pub watch: WatchConfig,
    pub cache: CacheConfig,
    /// Named repositories for multi-repository mode.
    pub repos: Vec<RepoConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub quiet_period_ms: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub path: PathBuf,
}

impl Default for DocfeedConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            show_hidden: true,
            extensions: vec![".md".to_string()],
            git_timeout_secs: crate::git::DEFAULT_TIMEOUT.as_secs(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            watch: WatchConfig::default(),
            cache: CacheConfig::default(),
            repos: Vec::new(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 500,
            max_wait_ms: 3000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: crate::cache::DEFAULT_TTL.as_millis() as u64,
        }
    }
}

impl DocfeedConfig {
    /// Load configuration from `docfeed.toml` in the given root directory.
    ///
    /// Returns the default configuration if the file does not exist, cannot
    /// be read or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load_from(&config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!("failed to load {CONFIG_FILE}: {err:#}. Using defaults.");
                Self::default()
            }
        }
    }

    /// Load configuration from an explicit file. Errors propagate.
    ///
    /// Repository paths are resolved against the file's directory, with a
    /// leading `~` expanded to the home directory.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));
        for repo in &mut config.repos {
            repo.path = resolve_repo_path(base, &repo.path);
        }
        Ok(config)
    }

    pub fn extension_set(&self) -> ExtensionSet {
        ExtensionSet::new(&self.extensions)
    }

    pub fn git(&self) -> Git {
        Git::new(Duration::from_secs(self.git_timeout_secs.max(1)))
    }

    pub fn timing(&self) -> Timing {
        Timing {
            quiet_period: Duration::from_millis(self.watch.quiet_period_ms),
            max_wait: Duration::from_millis(self.watch.max_wait_ms),
        }
    }

    /// Watcher filter using the same extensions and exclusions as the feed.
    pub fn event_filter(&self) -> EventFilter {
        EventFilter::new(self.extension_set(), self.exclude_dirs.clone())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }

    pub fn is_multi_repo(&self) -> bool {
        !self.repos.is_empty()
    }

    /// Human-readable problems with the repository list. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.repos.is_empty() {
            problems.push("No repositories configured".to_string());
        }
        let mut names = HashSet::new();
        for repo in &self.repos {
            if !names.insert(repo.name.as_str()) {
                problems.push(format!("Duplicate repository name: {}", repo.name));
            }
            if !repo.path.exists() {
                problems.push(format!(
                    "Repository path does not exist: {}",
                    repo.path.display()
                ));
            } else if !repo.path.is_dir() {
                problems.push(format!(
                    "Repository path is not a directory: {}",
                    repo.path.display()
                ));
            }
        }
        if self.watch.max_wait_ms < self.watch.quiet_period_ms {
            problems.push(format!(
                "watch.max_wait_ms ({}) is shorter than watch.quiet_period_ms ({})",
                self.watch.max_wait_ms, self.watch.quiet_period_ms
            ));
        }
        problems
    }

    /// Write a commented example configuration to `path`, creating parent
    /// directories as needed.
    pub fn write_example(path: &Path) -> anyhow::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(EXAMPLE_CONFIG.as_bytes())?;
        tmp.persist(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

fn resolve_repo_path(base: &Path, path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

const EXAMPLE_CONFIG: &str = r#"# docfeed configuration
#
# Placed as docfeed.toml in the served directory, or passed with --config.

# Server settings
host = "127.0.0.1"
port = 8000

# Document suffixes listed in the recently-changed feed and watched live.
extensions = [".md"]

# Show dot-files and dot-directories in directory listings.
# Hidden directories are never scanned for the feed.
show_hidden = true

# Seconds before a git invocation is abandoned.
git_timeout_secs = 10

# Directory names excluded from listings, the feed and the watcher.
# Defaults (if omitted): .git, .hg, .svn, node_modules, .venv, venv,
#   __pycache__, .pytest_cache, .mypy_cache, .ruff_cache, .egg-info,
#   .tox, .nox, dist, build, .cache
#
# exclude_dirs = ["node_modules", ".venv", "vendor"]

[watch]
# Flush a batch once no change has arrived for this long.
quiet_period_ms = 500
# Flush on the next change once a batch has been open this long.
max_wait_ms = 3000

[cache]
# Lifetime of a computed feed.
ttl_ms = 2000

# Repositories served together. Each needs a unique name.
#
# [[repos]]
# name = "notes"
# path = "~/Documents/notes"
#
# [[repos]]
# name = "work"
# path = "~/work/documentation"
"#;
