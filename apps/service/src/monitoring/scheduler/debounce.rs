use std::time::Duration;
use tokio::time::Instant;

/// What to do with an incoming trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Last run is at least one spacing ago, run right away
    RunNow,
    /// A single deferred run was armed for this instant
    Deferred(Instant),
    /// A deferred run is already armed, the event folds into it
    Coalesced,
}

/// Single-slot debounce buffer.
///
/// Owns exactly one pending deadline, so clearing or re-arming it can never
/// touch anything else the scheduler has queued.
#[derive(Debug, Clone)]
pub struct Debouncer {
    min_spacing: Duration,
    last_run: Option<Instant>,
    pending: Option<Instant>,
}

impl Debouncer {
    pub fn new(min_spacing: Duration) -> Self {
        Self { min_spacing, last_run: None, pending: None }
    }

    pub fn on_event(&mut self, now: Instant) -> DebounceDecision {
        if self.pending.is_some() {
            return DebounceDecision::Coalesced;
        }
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.min_spacing => {
                let at = last + self.min_spacing;
                self.pending = Some(at);
                DebounceDecision::Deferred(at)
            }
            _ => DebounceDecision::RunNow,
        }
    }

    /// Deadline of the armed deferred run, if any.
    pub fn pending(&self) -> Option<Instant> {
        self.pending
    }

    /// Record that a run started at `now`; disarms any pending run.
    pub fn mark_run(&mut self, now: Instant) {
        self.last_run = Some(now);
        self.pending = None;
    }
}
