//! docfeed: a recently-changed feed for document trees under git, and a live
//! change notifier.
//!
//! The read path is [`aggregate::RecencyAggregator`]: it reconciles git
//! history, the index and untracked files into one list ordered by
//! modification time, across nested repositories when the root is a plain
//! directory holding several. The write path is [`watcher::start_watcher`]:
//! it batches filesystem events, flushes the feed cache on git state changes
//! and fans notifications out through [`broadcast::Broadcaster`].

pub mod aggregate;
pub mod broadcast;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod git;
pub mod locator;
pub mod output;
pub mod record;
pub mod scanner;
#[cfg(feature = "web")]
pub mod server;
pub mod watcher;
