use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Recently-changed documents across git repositories, with live change feeds.
///
/// docfeed merges git history with untracked files into one feed ordered by
/// modification time, and can watch a tree to report changes as they settle.
#[derive(Parser, Debug)]
#[command(
    name = "docfeed",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact one-line-per-result format (default).
    #[default]
    Compact,
    /// Human-readable columnar table with ANSI bold headers when stdout is a terminal.
    Table,
    /// Structured JSON suitable for programmatic consumption.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the most recently modified documents under a directory.
    ///
    /// Works on a git work tree, a directory inside one, a directory holding
    /// several repositories, or a plain directory.
    Recent {
        /// Directory to report on.
        path: PathBuf,

        /// Maximum number of entries.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Document suffixes (comma-separated, e.g. ".md,.txt"). Defaults to the config.
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,

        /// Explicit configuration file instead of `<path>/docfeed.toml`.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Show the revision history of one file.
    History {
        /// Directory the file path is relative to.
        path: PathBuf,

        /// File path relative to `path`.
        file: String,

        /// Maximum number of revisions.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Latest revision of each of several files, from a single log pass.
    ///
    /// Files untouched in the last 500 revisions are reported without one.
    Last {
        /// Directory the file paths are relative to.
        path: PathBuf,

        /// File paths relative to `path`.
        #[arg(required = true)]
        files: Vec<String>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Show the change one revision made to a file.
    Diff {
        /// Directory the file path is relative to.
        path: PathBuf,

        /// File path relative to `path`.
        file: String,

        /// Revision id (4 to 40 hex digits).
        revision: String,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Working-directory status and current HEAD.
    Status {
        /// Directory to report on.
        path: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },

    /// Watch a directory and print each settled batch of changes as a JSON line.
    ///
    /// With a config that lists `[[repos]]`, every repository is watched and
    /// each batch carries the repository name.
    Watch {
        /// Directory to watch (ignored when the config lists repositories).
        path: PathBuf,

        /// Explicit configuration file instead of `<path>/docfeed.toml`.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Serve the feed over HTTP with live notifications on a WebSocket.
    #[cfg(feature = "web")]
    Serve {
        /// Directory to serve (ignored when the config lists repositories).
        path: PathBuf,

        /// Bind address. Defaults to the config (127.0.0.1).
        #[arg(long)]
        host: Option<String>,

        /// Port. Defaults to the config (8000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Explicit configuration file instead of `<path>/docfeed.toml`.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a commented example configuration file.
    InitConfig {
        /// Target file.
        #[arg(default_value = "docfeed.toml")]
        file: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
