//! Fan-out of change notifications to connected observers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A batch of changed paths under one watched repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesChanged {
    /// Set only when several repositories are watched at once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Root-relative, sorted, de-duplicated.
    pub paths: Vec<String>,
}

/// Messages sent to observers, serialised as `{"type": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Hello { version: String },
    FilesChanged(FilesChanged),
}

impl Notification {
    pub fn hello() -> Self {
        Notification::Hello {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn files_changed(repo: Option<String>, paths: Vec<String>) -> Self {
        Notification::FilesChanged(FilesChanged { repo, paths })
    }
}

/// The observer is gone and should be pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("observer disconnected")]
pub struct Disconnected;

/// One live recipient of notifications.
///
/// `deliver` must not block; a slow observer drops messages instead.
pub trait Observer: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), Disconnected>;
}

/// Observer backed by a bounded channel, one per connection.
pub struct ChannelObserver {
    sender: mpsc::Sender<Notification>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, notification: &Notification) -> Result<(), Disconnected> {
        match self.sender.try_send(notification.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("observer queue full, dropping notification");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Disconnected),
        }
    }
}

/// Observer that hands every `files_changed` batch to a closure.
pub struct CallbackObserver<F> {
    callback: F,
}

impl<F> Observer for CallbackObserver<F>
where
    F: Fn(&FilesChanged) + Send + Sync,
{
    fn deliver(&self, notification: &Notification) -> Result<(), Disconnected> {
        if let Notification::FilesChanged(batch) = notification {
            (self.callback)(batch);
        }
        Ok(())
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Outcome of one [`Broadcaster::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    observers: Mutex<HashMap<ObserverId, Arc<dyn Observer>>>,
}

/// The set of live observers. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.lock().insert(id, observer);
        debug!(observer = id.0, "observer registered");
        id
    }

    /// Register a channel observer and return its receiving end.
    pub fn register_channel(&self, capacity: usize) -> (ObserverId, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.register(Arc::new(ChannelObserver::new(tx)));
        (id, rx)
    }

    /// Subscribe a closure to every `files_changed` batch.
    pub fn on_files_changed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&FilesChanged) + Send + Sync + 'static,
    {
        self.register(Arc::new(CallbackObserver { callback }))
    }

    /// Returns false if `id` was not registered (already pruned, say).
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.inner.observers.lock().remove(&id).is_some();
        if removed {
            debug!(observer = id.0, "observer unregistered");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    /// Deliver `notification` to every observer, pruning the ones that fail.
    ///
    /// The set is snapshotted under the lock and delivery happens outside it,
    /// so observers may register or unregister mid-broadcast.
    pub fn broadcast(&self, notification: &Notification) -> BroadcastReport {
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, observer) in snapshot {
            match observer.deliver(notification) {
                Ok(()) => report.delivered += 1,
                Err(Disconnected) => failed.push(id),
            }
        }

        if !failed.is_empty() {
            let mut observers = self.inner.observers.lock();
            for id in &failed {
                observers.remove(id);
            }
            report.pruned = failed.len();
            warn!(pruned = report.pruned, "dropped disconnected observers");
        }
        report
    }
}
