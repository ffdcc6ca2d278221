use std::collections::BTreeSet;

use tokio::time::Instant;

use super::Timing;

/// What the reactor should do after recording an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Quiet-period timer (re)armed to fire at this instant.
    Armed(Instant),
    /// The batch has been open for at least `max_wait`; flush now.
    FlushNow,
}

/// Pending paths of one watched repository.
///
/// Idle when empty. The first recorded path fixes the window start; every
/// later path re-arms the quiet timer unless the window is already older than
/// `max_wait`.
#[derive(Debug, Default)]
pub struct WatchBatch {
    pending: BTreeSet<String>,
    started_at: Option<Instant>,
    quiet_until: Option<Instant>,
}

impl WatchBatch {
    pub fn record(&mut self, path: String, now: Instant, timing: &Timing) -> Step {
        self.pending.insert(path);
        let started_at = *self.started_at.get_or_insert(now);
        if now.saturating_duration_since(started_at) >= timing.max_wait {
            self.quiet_until = None;
            return Step::FlushNow;
        }
        let fire_at = now + timing.quiet_period;
        self.quiet_until = Some(fire_at);
        Step::Armed(fire_at)
    }

    /// When the quiet timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.quiet_until
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the batch, sorted and de-duplicated, back to idle.
    pub fn take(&mut self) -> Vec<String> {
        self.started_at = None;
        self.quiet_until = None;
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
