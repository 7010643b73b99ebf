//! Timer-driven scheduler, the low-power default.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tracing::{debug, info};

use super::{Lifecycle, Scheduler, SchedulerEnv, SchedulerKind, Task, current_runtime, ensure_nonzero, run_guarded};
use crate::error::SchedulerError;

/// How the alarm scheduler asks for repetition. Resolved once, when the
/// scheduler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmMode {
    /// One repeating timer; an interval change re-arms it one full
    /// interval from now.
    Repeating,
    /// A one-shot timer re-armed after every tick with the interval current
    /// at that moment, so a change applies from the next tick on.
    #[default]
    SelfRescheduling,
}

pub struct AlarmScheduler {
    mode: AlarmMode,
    runtime: Handle,
    lifecycle: Lifecycle,
    interval_tx: Option<watch::Sender<Duration>>,
    worker: Option<JoinHandle<()>>,
}

impl AlarmScheduler {
    pub fn new(env: &SchedulerEnv) -> Result<Self, SchedulerError> {
        Ok(Self {
            mode: env.alarm_mode,
            runtime: current_runtime(SchedulerKind::Alarm)?,
            lifecycle: Lifecycle::Created,
            interval_tx: None,
            worker: None,
        })
    }

    pub fn mode(&self) -> AlarmMode {
        self.mode
    }
}

/// Fixed-period timer. Returns when the interval sender is dropped.
async fn run_repeating(task: Task, mut interval_rx: watch::Receiver<Duration>) {
    let period = *interval_rx.borrow_and_update();
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => run_guarded(&task, SchedulerKind::Alarm).await,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }
        }
    }
}

/// One-shot timer re-armed after each tick. An interval change does not
/// move the pending deadline.
async fn run_self_rescheduling(task: Task, mut interval_rx: watch::Receiver<Duration>) {
    loop {
        let deadline = Instant::now() + *interval_rx.borrow_and_update();
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
        run_guarded(&task, SchedulerKind::Alarm).await;
    }
}

#[async_trait]
impl Scheduler for AlarmScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Alarm
    }

    fn schedule(&mut self, task: Task, interval: Duration) -> Result<(), SchedulerError> {
        ensure_nonzero(interval, SchedulerKind::Alarm)?;
        self.lifecycle.begin_schedule(SchedulerKind::Alarm)?;
        let (interval_tx, interval_rx) = watch::channel(interval);

        let worker = match self.mode {
            AlarmMode::Repeating => self.runtime.spawn(run_repeating(task, interval_rx)),
            AlarmMode::SelfRescheduling => {
                self.runtime.spawn(run_self_rescheduling(task, interval_rx))
            }
        };
        info!("Alarm scheduler started ({:?}, every {:?})", self.mode, interval);

        self.interval_tx = Some(interval_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn set_interval(&mut self, interval: Duration) -> Result<(), SchedulerError> {
        self.lifecycle.ensure_scheduled(SchedulerKind::Alarm)?;
        ensure_nonzero(interval, SchedulerKind::Alarm)?;
        if let Some(tx) = &self.interval_tx {
            tx.send_if_modified(|current| {
                if *current == interval {
                    return false;
                }
                *current = interval;
                true
            });
            debug!("Alarm interval set to {:?}", interval);
        }
        Ok(())
    }

    async fn destroy(&mut self) {
        if self.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.lifecycle = Lifecycle::Destroyed;
        // Dropping the sender stops the worker at its next wait point.
        self.interval_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("Alarm scheduler destroyed");
    }
}

impl Drop for AlarmScheduler {
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
    use std::sync::atomic::Ordering;

    fn alarm(mode: AlarmMode) -> AlarmScheduler {
        let (mut env, _) = test_env();
        env.alarm_mode = mode;
        AlarmScheduler::new(&env).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_rescheduling_ticks_every_interval() {
        let mut scheduler = alarm(AlarmMode::SelfRescheduling);
        let (task, log) = recording_task();
        let start = Instant::now();

        scheduler.schedule(task, Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(30_500)).await;

        let ticks: Vec<_> = log.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(
            ticks,
            vec![Duration::from_secs(10), Duration::from_secs(20), Duration::from_secs(30)]
        );
        scheduler.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_rescheduling_interval_change_applies_after_pending_tick() {
        let mut scheduler = alarm(AlarmMode::SelfRescheduling);
        let (task, log) = recording_task();
        let start = Instant::now();

        scheduler.schedule(task, Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.set_interval(Duration::from_secs(4)).unwrap();
        tokio::time::sleep(Duration::from_millis(15_500)).await;

        // Pending tick at 10s is kept, no extra tick forced, then 4s spacing.
        let ticks: Vec<_> = log.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(
            ticks,
            vec![Duration::from_secs(10), Duration::from_secs(14), Duration::from_secs(18)]
        );
        scheduler.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_mode_rearms_on_interval_change() {
        let mut scheduler = alarm(AlarmMode::Repeating);
        assert_eq!(scheduler.mode(), AlarmMode::Repeating);
        let (task, log) = recording_task();
        let start = Instant::now();

        scheduler.schedule(task, Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        scheduler.set_interval(Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let ticks: Vec<_> = log.lock().unwrap().iter().map(|t| *t - start).collect();
        assert_eq!(
            ticks,
            vec![Duration::from_secs(10), Duration::from_secs(17), Duration::from_secs(22)]
        );
        scheduler.destroy().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_destroy() {
        let mut scheduler = alarm(AlarmMode::SelfRescheduling);
        let (task, count) = counting_task();

        scheduler.schedule(task, Duration::from_secs(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        scheduler.destroy().await;
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);

        scheduler.destroy().await;
        assert!(matches!(
            scheduler.set_interval(Duration::from_secs(1)),
            Err(SchedulerError::Destroyed(SchedulerKind::Alarm))
        ));
    }

    #[tokio::test]
    async fn test_schedule_only_once() {
        let mut scheduler = alarm(AlarmMode::SelfRescheduling);
        let (task, _) = counting_task();
        scheduler.schedule(task.clone(), Duration::from_secs(60)).unwrap();
        assert!(matches!(
            scheduler.schedule(task, Duration::from_secs(60)),
            Err(SchedulerError::AlreadyScheduled(SchedulerKind::Alarm))
        ));
        scheduler.destroy().await;
    }
}
