use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::record::{ChangeRecord, ExtensionSet};

/// Default lifetime of a cached feed.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

/// A computed feed, shared between the cache and every reader.
pub type Feed = Arc<Vec<ChangeRecord>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub root: PathBuf,
    pub limit: usize,
    pub extensions: ExtensionSet,
}

/// Storage for computed feeds.
///
/// Injected into the aggregator and shared with the watcher, which flushes it
/// when git state changes. Implementations must be safe to call from any task.
pub trait FeedCache: Send + Sync {
    fn lookup(&self, key: &CacheKey) -> Option<Feed>;
    fn store(&self, key: CacheKey, feed: Feed);
    /// Drop every entry computed for `root`.
    fn invalidate(&self, root: &Path);
    /// Drop everything.
    fn flush_all(&self);
}

/// Return the cached feed for `key`, or run `compute` and store its result.
///
/// There is no per-key locking: two callers missing at the same time both
/// compute, and the later store wins. Results are equivalent either way.
pub async fn get_or_compute<F, Fut>(cache: &dyn FeedCache, key: CacheKey, compute: F) -> Feed
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Vec<ChangeRecord>>,
{
    if let Some(hit) = cache.lookup(&key) {
        return hit;
    }
    let feed: Feed = Arc::new(compute().await);
    cache.store(key, Arc::clone(&feed));
    feed
}

struct CacheEntry {
    created_at: Instant,
    results: Feed,
}

/// In-memory cache whose entries expire `ttl` after creation.
///
/// Expired entries are evicted lazily when looked up.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl FeedCache for TtlCache {
    fn lookup(&self, key: &CacheKey) -> Option<Feed> {
        let mut entries = self.entries.lock();
        let found = entries
            .get(key)
            .map(|entry| (entry.created_at.elapsed() < self.ttl, Arc::clone(&entry.results)));
        match found {
            Some((true, feed)) => Some(feed),
            Some((false, _)) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: CacheKey, feed: Feed) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                created_at: Instant::now(),
                results: feed,
            },
        );
    }

    fn invalidate(&self, root: &Path) {
        self.entries.lock().retain(|key, _| key.root != root);
    }

    fn flush_all(&self) {
        self.entries.lock().clear();
    }
}

/// A cache that never holds anything. Every read recomputes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl FeedCache for NoopCache {
    fn lookup(&self, _key: &CacheKey) -> Option<Feed> {
        None
    }

    fn store(&self, _key: CacheKey, _feed: Feed) {}

    fn invalidate(&self, _root: &Path) {}

    fn flush_all(&self) {}
}
