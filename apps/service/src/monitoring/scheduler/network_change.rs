//! Event-triggered scheduler. Runs on network changes, never more often
//! than once per interval.

use async_trait::async_trait;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use super::debounce::{DebounceDecision, Debouncer};
use super::{Lifecycle, Scheduler, SchedulerEnv, SchedulerKind, Task, current_runtime, ensure_nonzero, run_guarded};
use crate::error::SchedulerError;
use crate::monitoring::events::NetworkEvent;

pub struct NetworkChangeScheduler {
    runtime: Handle,
    lifecycle: Lifecycle,
    events: Option<mpsc::Receiver<NetworkEvent>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl NetworkChangeScheduler {
    /// Subscribes to the environment's event source right away; a source
    /// that cannot be opened makes construction fail.
    pub fn new(env: &SchedulerEnv) -> Result<Self, SchedulerError> {
        let runtime = current_runtime(SchedulerKind::NetworkChange)?;
        let events = {
            let _guard = runtime.enter();
            env.network_events.subscribe().map_err(SchedulerError::EventSourceUnavailable)?
        };
        Ok(Self {
            runtime,
            lifecycle: Lifecycle::Created,
            events: Some(events),
            shutdown_tx: None,
            worker: None,
        })
    }
}

async fn run_debounced(
    task: Task,
    min_spacing: Duration,
    mut events: mpsc::Receiver<NetworkEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut debouncer = Debouncer::new(min_spacing);

    loop {
        let pending = debouncer.pending();
        tokio::select! {
            _ = &mut shutdown_rx => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match debouncer.on_event(Instant::now()) {
                    DebounceDecision::RunNow => {
                        debug!("Network event {:?}, sampling now", event);
                        debouncer.mark_run(Instant::now());
                        run_guarded(&task, SchedulerKind::NetworkChange).await;
                    }
                    DebounceDecision::Deferred(at) => {
                        debug!("Network event {:?}, sampling deferred by {:?}", event, at - Instant::now());
                    }
                    DebounceDecision::Coalesced => {
                        debug!("Network event {:?} coalesced into pending run", event);
                    }
                }
            }
            _ = sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                debouncer.mark_run(Instant::now());
                run_guarded(&task, SchedulerKind::NetworkChange).await;
            }
        }
    }
}

#[async_trait]
impl Scheduler for NetworkChangeScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::NetworkChange
    }

    /// `interval` is only the minimum spacing between runs; events decide
    /// when runs happen.
    fn schedule(&mut self, task: Task, interval: Duration) -> Result<(), SchedulerError> {
        ensure_nonzero(interval, SchedulerKind::NetworkChange)?;
        self.lifecycle.begin_schedule(SchedulerKind::NetworkChange)?;
        let Some(mut events) = self.events.take() else {
            return Err(SchedulerError::Destroyed(SchedulerKind::NetworkChange));
        };
        // Events from before scheduling are stale.
        while events.try_recv().is_ok() {}

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.worker = Some(self.runtime.spawn(run_debounced(task, interval, events, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        info!("Network change scheduler started (minimum spacing {:?})", interval);
        Ok(())
    }

    /// Intentionally a no-op: this strategy is triggered by events, and the
    /// spacing fixed at `schedule` time stays in force.
    fn set_interval(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        self.lifecycle.ensure_scheduled(SchedulerKind::NetworkChange)?;
        debug!("Ignoring interval change to {:?} on network change scheduler", interval);
        Ok(())
    }

    async fn destroy(&mut self) {
        if self.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.lifecycle = Lifecycle::Destroyed;
        self.events = None;
        self.shutdown_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("Network change scheduler destroyed");
    }
}

impl Drop for NetworkChangeScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::monitoring::events::NetworkEventSource;
    use std::sync::Arc;

    fn link_event() -> NetworkEvent {
        NetworkEvent::ConnectivityChanged { interface: "wlan0".into(), operstate: "up".into() }
    }

    /// Let the worker drain its channel under paused time.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_produces_single_deferred_run() {
        let (env, events) = test_env();
        let mut scheduler = NetworkChangeScheduler::new(&env).unwrap();
        let (task, log) = recording_task();
        let start = Instant::now();

        scheduler.schedule(task, Duration::from_secs(10)).unwrap();

        // First event runs immediately.
        events.emit(link_event());
        settle().await;
        assert_eq!(log.lock().unwrap().len(), 1);

        // A burst three seconds later folds into one run at t=10s.
        tokio::time::sleep(Duration::from_secs(3)).await;
        for _ in 0..5 {
            events.emit(link_event());
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_secs(20)).await;

        let ticks: Vec<_> = log.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(ticks, vec![Duration::ZERO, Duration::from_secs(10)]);
        scheduler.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_runs_without_events() {
        let (env, _events) = test_env();
        let mut scheduler = NetworkChangeScheduler::new(&env).unwrap();
        let (task, log) = recording_task();

        scheduler.schedule(task, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(log.lock().unwrap().is_empty());

        scheduler.set_interval(Duration::from_millis(10)).unwrap();
        scheduler.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_unsubscribes() {
        let (env, events) = test_env();
        let mut scheduler = NetworkChangeScheduler::new(&env).unwrap();
        let (task, _) = counting_task();
        scheduler.schedule(task, Duration::from_secs(1)).unwrap();
        assert_eq!(events.subscriber_count(), 1);

        scheduler.destroy().await;
        assert_eq!(events.subscriber_count(), 0);
    }

    struct BrokenSource;

    impl NetworkEventSource for BrokenSource {
        fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<NetworkEvent>> {
            Err(anyhow::anyhow!("netlink unavailable"))
        }
    }

    #[tokio::test]
    async fn test_unavailable_event_source_fails_construction() {
        let (mut env, _) = test_env();
        env.network_events = Arc::new(BrokenSource);
        assert!(matches!(
            NetworkChangeScheduler::new(&env),
            Err(SchedulerError::EventSourceUnavailable(_))
        ));
    }
}
