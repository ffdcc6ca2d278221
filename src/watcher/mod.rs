pub mod batch;
pub mod filter;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Notification};
use crate::cache::FeedCache;
use crate::error::WatchError;
use crate::fs::relative_string;

use batch::{Step, WatchBatch};
use filter::{EventFilter, is_state_marker};

/// Debounce settings shared by every watched repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Flush once no relevant event has arrived for this long.
    pub quiet_period: Duration,
    /// Flush on the next event once a batch has been open this long.
    pub max_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(500),
            max_wait: Duration::from_millis(3000),
        }
    }
}

/// A directory to watch. `name` is attached to its notifications and should
/// only be set when several repositories are watched together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedRepository {
    pub name: Option<String>,
    pub root: PathBuf,
}

impl WatchedRepository {
    pub fn new(name: Option<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            root: root.into(),
        }
    }
}

/// Absolute paths reported together by one filesystem event.
pub type RawChange = Vec<PathBuf>;

/// Handle to a running watcher. Dropping it stops the OS watcher; pending
/// batches are discarded.
pub struct WatcherHandle {
    _watcher: Option<RecommendedWatcher>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Stop the reactor and wait for it to exit. Pending batches are dropped
    /// without notifying anyone.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = %err, "watcher task ended abnormally");
        }
    }
}

/// Start watching `repos` recursively.
///
/// Filesystem events are filtered, batched per repository and flushed as
/// `files_changed` notifications through `broadcaster`. A batch containing a
/// git state marker flushes `cache` first.
pub fn start_watcher(
    repos: Vec<WatchedRepository>,
    filter: EventFilter,
    timing: Timing,
    cache: Arc<dyn FeedCache>,
    broadcaster: Broadcaster,
) -> Result<WatcherHandle, WatchError> {
    if repos.is_empty() {
        return Err(WatchError::NothingToWatch);
    }
    let repos: Vec<WatchedRepository> = repos
        .into_iter()
        .map(|repo| WatchedRepository {
            root: std::fs::canonicalize(&repo.root).unwrap_or(repo.root),
            name: repo.name,
        })
        .collect();

    let (tx, mut handle) = spawn_reactor(repos.clone(), filter, timing, cache, broadcaster);
    // notify calls back on its own thread; the unbounded send never blocks it.
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) || event.paths.is_empty() {
                    return;
                }
                let _ = tx.send(event.paths);
            }
            Err(err) => warn!(error = %err, "watch error"),
        }
    })?;

    for repo in &repos {
        watcher
            .watch(&repo.root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::WatchPath {
                path: repo.root.clone(),
                source,
            })?;
        info!(root = %repo.root.display(), repo = ?repo.name, "watching");
    }
    handle._watcher = Some(watcher);
    Ok(handle)
}

/// Spawn the batching reactor without an OS watcher. Raw changes sent on the
/// returned channel are processed exactly like filesystem events.
pub fn spawn_reactor(
    repos: Vec<WatchedRepository>,
    filter: EventFilter,
    timing: Timing,
    cache: Arc<dyn FeedCache>,
    broadcaster: Broadcaster,
) -> (mpsc::UnboundedSender<RawChange>, WatcherHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let reactor = Reactor::new(repos, filter, timing, cache, broadcaster);
    let task = tokio::spawn(reactor.run(rx, shutdown_rx));
    (
        tx,
        WatcherHandle {
            _watcher: None,
            shutdown: Some(shutdown_tx),
            task,
        },
    )
}

// ---------------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------------

struct Slot {
    repo: WatchedRepository,
    batch: WatchBatch,
}

/// Owns every batch and its timer. Runs as a single task, so batch state needs
/// no locking.
struct Reactor {
    slots: Vec<Slot>,
    filter: EventFilter,
    timing: Timing,
    cache: Arc<dyn FeedCache>,
    broadcaster: Broadcaster,
}

impl Reactor {
    fn new(
        repos: Vec<WatchedRepository>,
        filter: EventFilter,
        timing: Timing,
        cache: Arc<dyn FeedCache>,
        broadcaster: Broadcaster,
    ) -> Self {
        let mut slots: Vec<Slot> = repos
            .into_iter()
            .map(|repo| Slot {
                repo,
                batch: WatchBatch::default(),
            })
            .collect();
        // Deepest root first so nested repositories win the prefix match.
        slots.sort_by_key(|slot| std::cmp::Reverse(slot.repo.root.components().count()));
        Self {
            slots,
            filter,
            timing,
            cache,
            broadcaster,
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RawChange>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let next = self.slots.iter().filter_map(|slot| slot.batch.deadline()).min();
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                change = rx.recv() => match change {
                    Some(paths) => self.on_change(paths),
                    None => break,
                },
                _ = wait_until(next) => self.on_timer(Instant::now()),
            }
        }
        let dropped: usize = self.slots.iter().filter(|slot| !slot.batch.is_idle()).count();
        debug!(pending_batches = dropped, "watcher stopped");
    }

    fn on_change(&mut self, paths: RawChange) {
        let now = Instant::now();
        for path in paths {
            let Some((index, rel)) = self.route(&path) else {
                continue;
            };
            let Some(relevance) = self.filter.classify(&rel) else {
                continue;
            };
            debug!(path = %rel, ?relevance, "relevant change");
            let step = self.slots[index].batch.record(rel, now, &self.timing);
            if step == Step::FlushNow {
                self.flush(index);
            }
        }
    }

    fn on_timer(&mut self, now: Instant) {
        for index in 0..self.slots.len() {
            if self.slots[index]
                .batch
                .deadline()
                .is_some_and(|deadline| deadline <= now)
            {
                self.flush(index);
            }
        }
    }

    /// Owning slot and repository-relative path of `path`.
    fn route(&self, path: &Path) -> Option<(usize, String)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(index, slot)| Some((index, relative_string(path, &slot.repo.root)?)))
    }

    fn flush(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        let paths = slot.batch.take();
        if paths.is_empty() {
            return;
        }
        if paths.iter().any(|p| is_state_marker(p)) {
            self.cache.flush_all();
            debug!("cleared feed cache after git state change");
        }
        match &slot.repo.name {
            Some(name) => info!(repo = %name, count = paths.len(), "batch: files changed"),
            None => info!(count = paths.len(), "batch: files changed"),
        }
        debug!(?paths, "changed paths");
        let notification = Notification::files_changed(slot.repo.name.clone(), paths);
        self.broadcaster.broadcast(&notification);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, TtlCache};
    use crate::record::ExtensionSet;
    use tokio::time::{sleep, timeout};

    fn reactor(
        repos: Vec<WatchedRepository>,
    ) -> (
        mpsc::UnboundedSender<RawChange>,
        WatcherHandle,
        mpsc::Receiver<Notification>,
        Arc<TtlCache>,
    ) {
        let broadcaster = Broadcaster::new();
        let (_, rx) = broadcaster.register_channel(64);
        let cache = Arc::new(TtlCache::new(Duration::from_secs(600)));
        let (tx, handle) = spawn_reactor(
            repos,
            EventFilter::default(),
            Timing::default(),
            cache.clone(),
            broadcaster,
        );
        (tx, handle, rx, cache)
    }

    fn single() -> Vec<WatchedRepository> {
        vec![WatchedRepository::new(None, "/repo")]
    }

    fn paths_of(notification: Notification) -> (Option<String>, Vec<String>) {
        match notification {
            Notification::FilesChanged(batch) => (batch.repo, batch.paths),
            other => panic!("unexpected notification {other:?}"),
        }
    }

    fn seed(cache: &TtlCache) {
        cache.store(
            CacheKey {
                root: PathBuf::from("/repo"),
                limit: 10,
                extensions: ExtensionSet::default(),
            },
            Arc::new(Vec::new()),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_quiet_period_is_one_batch() {
        let (tx, handle, mut rx, cache) = reactor(single());
        seed(&cache);

        for name in ["b.md", "a.md", "b.md", "docs/c.md", "a.md"] {
            tx.send(vec![PathBuf::from("/repo").join(name)]).unwrap();
            sleep(Duration::from_millis(40)).await;
        }

        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            paths_of(first),
            (None, vec!["a.md".to_string(), "b.md".to_string(), "docs/c.md".to_string()])
        );
        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.len(), 1, "content-only batch keeps the cache");
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_deadline_forces_flush_under_steady_activity() {
        let (tx, handle, mut rx, _cache) = reactor(single());
        let start = Instant::now();

        let feeder = tokio::spawn(async move {
            for i in 0..12 {
                tx.send(vec![PathBuf::from(format!("/repo/note{i:02}.md"))]).unwrap();
                sleep(Duration::from_millis(400)).await;
            }
        });

        let first = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "flushed too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3500), "flushed too late: {elapsed:?}");
        let (_, paths) = paths_of(first);
        assert_eq!(paths.len(), 9);
        assert_eq!(paths.first().map(String::as_str), Some("note00.md"));

        feeder.await.unwrap();
        let second = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
        assert_eq!(paths_of(second).1.len(), 3);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_marker_batch_flushes_cache() {
        let (tx, handle, mut rx, cache) = reactor(single());
        seed(&cache);

        tx.send(vec![PathBuf::from("/repo/.git/index")]).unwrap();
        let batch = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(paths_of(batch).1, vec![".git/index".to_string()]);
        assert!(cache.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_irrelevant_events_never_open_a_batch() {
        let (tx, handle, mut rx, cache) = reactor(single());
        seed(&cache);

        tx.send(vec![
            PathBuf::from("/repo/src/main.rs"),
            PathBuf::from("/repo/.git/refs/heads/index"),
            PathBuf::from("/repo/.git/objects/ab/cdef"),
            PathBuf::from("/repo/node_modules/x/README.md"),
            PathBuf::from("/elsewhere/a.md"),
        ])
        .unwrap();
        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(cache.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_repositories_batch_separately() {
        let (tx, handle, mut rx, _cache) = reactor(vec![
            WatchedRepository::new(Some("site".into()), "/work/site"),
            WatchedRepository::new(Some("docs".into()), "/work/site/docs"),
        ]);

        tx.send(vec![
            PathBuf::from("/work/site/index.md"),
            PathBuf::from("/work/site/docs/guide.md"),
        ])
        .unwrap();

        let mut batches = Vec::new();
        for _ in 0..2 {
            let next = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            batches.push(paths_of(next));
        }
        batches.sort();
        assert_eq!(
            batches,
            vec![
                (Some("docs".to_string()), vec!["guide.md".to_string()]),
                (Some("site".to_string()), vec!["index.md".to_string()]),
            ]
        );
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_batch() {
        let (tx, handle, mut rx, _cache) = reactor(single());
        tx.send(vec![PathBuf::from("/repo/a.md")]).unwrap();
        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_watcher_requires_a_repository() {
        let result = start_watcher(
            Vec::new(),
            EventFilter::default(),
            Timing::default(),
            Arc::new(TtlCache::default()),
            Broadcaster::new(),
        );
        assert!(matches!(result, Err(WatchError::NothingToWatch)));
    }
}
