//! Owns the monitoring session: one monitor loop, at most one scheduler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use super::aggregator::SampleAggregator;
use super::monitor_loop::MonitorLoop;
use super::scheduler::{Scheduler, SchedulerEnv, SchedulerKind, create_scheduler};
use super::sources::ProbeSource;
use crate::error::SchedulerError;
use crate::preferences::{PreferenceChange, Preferences, Settings};

pub type SchedulerFactory = Box<
    dyn Fn(SchedulerKind, &SchedulerEnv) -> Result<Box<dyn Scheduler>, SchedulerError> + Send + Sync,
>;

pub struct MonitorController {
    env: SchedulerEnv,
    preferences: Arc<Preferences>,
    monitor_loop: Arc<MonitorLoop>,
    aggregator: Arc<SampleAggregator>,
    probe_source: Option<Arc<ProbeSource>>,
    factory: SchedulerFactory,
    active: Option<Box<dyn Scheduler>>,
    interval: Duration,
    changes: Option<broadcast::Receiver<PreferenceChange>>,
}

impl MonitorController {
    pub fn new(
        env: SchedulerEnv,
        preferences: Arc<Preferences>,
        monitor_loop: Arc<MonitorLoop>,
        aggregator: Arc<SampleAggregator>,
    ) -> Self {
        let interval = Duration::from_millis(preferences.snapshot().interval_millis);
        Self {
            env,
            preferences,
            monitor_loop,
            aggregator,
            probe_source: None,
            factory: Box::new(create_scheduler),
            active: None,
            interval,
            changes: None,
        }
    }

    /// Keep the probe's timeout and host in step with preference changes
    pub fn with_probe_source(mut self, probe_source: Arc<ProbeSource>) -> Self {
        self.probe_source = Some(probe_source);
        self
    }

    #[cfg(test)]
    pub fn with_factory(mut self, factory: SchedulerFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn active_kind(&self) -> Option<SchedulerKind> {
        self.active.as_ref().map(|scheduler| scheduler.kind())
    }

    #[cfg(test)]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Subscribe to preference changes, prepare the field sources and
    /// start the configured scheduler.
    pub async fn start(&mut self) {
        // Subscribe before reading so no change slips between the two.
        self.changes = Some(self.preferences.subscribe());
        self.aggregator.on_create().await;

        let settings = self.preferences.snapshot();
        self.apply_loop_settings(&settings);
        self.interval = Duration::from_millis(settings.interval_millis);
        if let Some(probe) = &self.probe_source {
            probe.set_sampling_interval(self.interval);
        }

        info!(
            "Monitoring started with {} scheduler every {:?} (sources: {})",
            settings.scheduler_kind,
            self.interval,
            self.aggregator.source_names().join(", ")
        );
        self.activate(settings.scheduler_kind);
    }

    /// Process preference changes until `shutdown` resolves, then shut down.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let Some(changes) = self.changes.as_mut() else {
                shutdown.as_mut().await;
                break;
            };

            let received = tokio::select! {
                biased;

                received = changes.recv() => received,
                _ = shutdown.as_mut() => break,
            };

            match received {
                Ok(change) => self.handle_change(change).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} preference changes, resyncing", skipped);
                    self.resync().await;
                }
                Err(RecvError::Closed) => {
                    debug!("Preference notifications closed");
                    self.changes = None;
                }
            }
        }

        self.shutdown().await;
    }

    pub async fn handle_change(&mut self, change: PreferenceChange) {
        debug!("Handling preference change {:?}", change);
        match change {
            PreferenceChange::IntervalMillis(millis) => self.change_interval(Duration::from_millis(millis)),
            PreferenceChange::SchedulerKind(kind) => self.change_kind(kind).await,
            PreferenceChange::WakeIntervalMillis(millis) => {
                self.monitor_loop.set_wake_interval(Duration::from_millis(millis))
            }
            PreferenceChange::RetentionCount(count) => self.monitor_loop.set_retention_count(count),
            PreferenceChange::ProbeHost(host) => {
                if let Some(probe) = &self.probe_source {
                    probe.set_host(host);
                }
            }
        }
    }

    /// Stop the active scheduler, unsubscribe and release the sources.
    /// The loop can be started again afterwards.
    pub async fn shutdown(&mut self) {
        self.changes = None;
        if let Some(mut scheduler) = self.active.take() {
            scheduler.destroy().await;
            info!("Stopped {} scheduler", scheduler.kind());
        }
        self.aggregator.on_destroy().await;
    }

    fn change_interval(&mut self, interval: Duration) {
        if interval == self.interval {
            return;
        }
        self.interval = interval;
        if let Some(probe) = &self.probe_source {
            probe.set_sampling_interval(interval);
        }
        if let Some(scheduler) = self.active.as_mut()
            && let Err(e) = scheduler.set_interval(interval)
        {
            error!("Failed to change interval on {} scheduler: {}", scheduler.kind(), e);
        }
    }

    async fn change_kind(&mut self, kind: SchedulerKind) {
        if self.active_kind() == Some(kind) {
            return;
        }

        // The old scheduler must be fully gone before the new one exists.
        if let Some(mut old) = self.active.take() {
            old.destroy().await;
            info!("Replaced {} scheduler with {}", old.kind(), kind);
        }
        self.activate(kind);
    }

    /// Build and schedule one scheduler. A failure is logged once and leaves
    /// monitoring idle until the next scheduler change.
    fn activate(&mut self, kind: SchedulerKind) {
        let mut scheduler = match (self.factory)(kind, &self.env) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                error!("Could not create {} scheduler, monitoring is paused: {}", kind, e);
                return;
            }
        };

        match scheduler.schedule(self.monitor_loop.task(), self.interval) {
            Ok(()) => self.active = Some(scheduler),
            Err(e) => error!("Could not schedule sampling on {} scheduler: {}", kind, e),
        }
    }

    async fn resync(&mut self) {
        let settings = self.preferences.snapshot();
        self.apply_loop_settings(&settings);
        self.change_interval(Duration::from_millis(settings.interval_millis));
        self.change_kind(settings.scheduler_kind).await;
    }

    fn apply_loop_settings(&self, settings: &Settings) {
        self.monitor_loop.set_wake_interval(Duration::from_millis(settings.wake_interval_millis));
        self.monitor_loop.set_retention_count(settings.retention_count);
        if let Some(probe) = &self.probe_source {
            probe.set_host(settings.probe_host.clone());
        }
    }
}
