use anyhow::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::aggregator::SampleAggregator;
use super::report::{NoopAlerter, NoopReporter, ProbeAlerter, ReportDispatcher};
use super::scheduler::{Task, task_fn};
use super::timing::{WAKE_ASSERTION_CEILING, wake_due};
use super::types::ProbeOutcome;
use super::wake::WakeLock;
use crate::database::SampleStore;

const WAKE_TAG: &str = "netmon:tick";

struct LoopState {
    last_wake: Option<Instant>,
    wake_interval: Duration,
    /// Samples kept after each tick; 0 keeps everything
    retention_count: u64,
}

/// The body of every tick: sample, persist, prune, report.
///
/// Not meant to be run concurrently with itself; every scheduler serializes
/// its ticks.
pub struct MonitorLoop {
    aggregator: Arc<SampleAggregator>,
    store: Arc<dyn SampleStore>,
    wake_lock: Arc<dyn WakeLock>,
    reporter: Arc<dyn ReportDispatcher>,
    alerter: Arc<dyn ProbeAlerter>,
    state: Mutex<LoopState>,
}

impl MonitorLoop {
    pub fn new(
        aggregator: Arc<SampleAggregator>,
        store: Arc<dyn SampleStore>,
        wake_lock: Arc<dyn WakeLock>,
        wake_interval: Duration,
        retention_count: u64,
    ) -> Self {
        Self {
            aggregator,
            store,
            wake_lock,
            reporter: Arc::new(NoopReporter),
            alerter: Arc::new(NoopAlerter),
            state: Mutex::new(LoopState { last_wake: None, wake_interval, retention_count }),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ReportDispatcher>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn ProbeAlerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn set_wake_interval(&self, wake_interval: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.wake_interval = wake_interval;
        }
    }

    pub fn set_retention_count(&self, retention_count: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.retention_count = retention_count;
        }
    }

    /// This loop as a scheduler task
    pub fn task(self: &Arc<Self>) -> Task {
        let this = Arc::clone(self);
        task_fn(move || {
            let this = Arc::clone(&this);
            async move { this.run().await }
        })
    }

    pub async fn run(&self) -> Result<()> {
        let (wake_guard, retention_count) = {
            let mut state =
                self.state.lock().map_err(|_| anyhow::anyhow!("monitor loop state poisoned"))?;
            let now = Instant::now();
            let guard = if wake_due(state.last_wake, now, state.wake_interval) {
                state.last_wake = Some(now);
                Some(self.wake_lock.acquire(WAKE_TAG, Some(WAKE_ASSERTION_CEILING)))
            } else {
                None
            };
            (guard, state.retention_count)
        };

        let outcome = self.sample_and_persist(retention_count).await;
        drop(wake_guard);

        if let Some(outcome) = outcome {
            self.alerter.notify_probe_failure_if_unexpected(outcome);
        }
        if let Err(e) = self.reporter.dispatch_report_if_due().await {
            warn!("Report dispatch failed: {:#}", e);
        }
        Ok(())
    }

    /// Build one sample, store it and prune. Failures are logged here; a
    /// sample that fails to persist is dropped and the next tick moves on.
    async fn sample_and_persist(&self, retention_count: u64) -> Option<ProbeOutcome> {
        let sample = self.aggregator.collect().await;
        let outcome = ProbeOutcome::from_sample(&sample);

        // A panicking store must not skip pruning, so each call is isolated.
        match AssertUnwindSafe(self.store.insert(&sample)).catch_unwind().await {
            Ok(Ok(id)) => debug!("Stored sample {} ({} fields)", id, sample.fields().len()),
            Ok(Err(e)) => error!("Failed to persist sample at {}: {:#}", sample.timestamp_millis(), e),
            Err(_) => error!("Storage panicked while persisting sample at {}", sample.timestamp_millis()),
        }

        if retention_count > 0 {
            match AssertUnwindSafe(self.store.prune_keeping_most_recent(retention_count))
                .catch_unwind()
                .await
            {
                Ok(Ok(0)) => {}
                Ok(Ok(deleted)) => debug!("Pruned {} samples beyond retention of {}", deleted, retention_count),
                Ok(Err(e)) => warn!("Retention pruning failed: {:#}", e),
                Err(_) => error!("Storage panicked while pruning to {} samples", retention_count),
            }
        }

        outcome
    }
}
