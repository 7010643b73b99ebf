//! Fixed-rate worker that keeps the machine awake for as long as it is
//! scheduled. Most accurate, most expensive.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use super::{Lifecycle, Scheduler, SchedulerEnv, SchedulerKind, Task, current_runtime, ensure_nonzero, run_guarded};
use crate::error::SchedulerError;
use crate::monitoring::wake::{WakeGuard, WakeLock};

const WAKE_TAG: &str = "netmon:executor";

pub struct ExecutorScheduler {
    runtime: Handle,
    wake_lock: Arc<dyn WakeLock>,
    lifecycle: Lifecycle,
    wake_guard: Option<WakeGuard>,
    interval_tx: Option<mpsc::UnboundedSender<Duration>>,
    worker: Option<JoinHandle<()>>,
}

impl ExecutorScheduler {
    pub fn new(env: &SchedulerEnv) -> Result<Self, SchedulerError> {
        Ok(Self {
            runtime: current_runtime(SchedulerKind::Executor)?,
            wake_lock: Arc::clone(&env.wake_lock),
            lifecycle: Lifecycle::Created,
            wake_guard: None,
            interval_tx: None,
            worker: None,
        })
    }
}

/// Single worker: the first tick fires immediately, then at a fixed rate.
/// A new interval re-anchors the rate at the moment it arrives.
async fn run_fixed_rate(task: Task, period: Duration, mut interval_rx: mpsc::UnboundedReceiver<Duration>) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => run_guarded(&task, SchedulerKind::Executor).await,
            next = interval_rx.recv() => match next {
                Some(period) => {
                    timer = interval(period);
                    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                }
                None => break,
            },
        }
    }
}

#[async_trait]
impl Scheduler for ExecutorScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Executor
    }

    fn schedule(&mut self, task: Task, interval: Duration) -> Result<(), SchedulerError> {
        ensure_nonzero(interval, SchedulerKind::Executor)?;
        self.lifecycle.begin_schedule(SchedulerKind::Executor)?;
        self.wake_guard = Some(self.wake_lock.acquire(WAKE_TAG, None));

        let (interval_tx, interval_rx) = mpsc::unbounded_channel();
        self.worker = Some(self.runtime.spawn(run_fixed_rate(task, interval, interval_rx)));
        self.interval_tx = Some(interval_tx);
        info!("Executor scheduler started at a fixed rate of {:?}", interval);
        Ok(())
    }

    fn set_interval(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        self.lifecycle.ensure_scheduled(SchedulerKind::Executor)?;
        ensure_nonzero(interval, SchedulerKind::Executor)?;
        if let Some(tx) = &self.interval_tx
            && tx.send(interval).is_ok()
        {
            debug!("Executor rate changed to {:?}", interval);
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        if self.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.lifecycle = Lifecycle::Destroyed;
        self.interval_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        // Only release once the worker can no longer tick.
        self.wake_guard = None;
        info!("Executor scheduler destroyed");
    }
}

impl Drop for ExecutorScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
