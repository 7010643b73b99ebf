//! Strategies that decide when the sampling task fires.
//!
//! Every strategy follows the same lifecycle:
//! `new -> schedule(task, interval) -> [set_interval]* -> destroy`.
//! A destroyed scheduler cannot be restarted; build a new one instead.
//! Ticks from one scheduler never overlap, because each strategy runs its
//! task inline on a single worker task.

pub mod alarm;
pub mod debounce;
pub mod executor;
pub mod network_change;

pub use alarm::{AlarmMode, AlarmScheduler};
pub use executor::ExecutorScheduler;
pub use network_change::NetworkChangeScheduler;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::events::NetworkEventSource;
use super::wake::WakeLock;
use crate::error::SchedulerError;

/// The sampling callback handed to a scheduler
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`Task`].
pub fn task_fn<F, Fut>(f: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Which scheduling strategy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Timer-driven, low power
    Alarm,
    /// Fixed-rate worker holding a wake assertion for its whole lifetime
    Executor,
    /// Fires on network changes, spaced at least one interval apart
    NetworkChange,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Alarm => write!(f, "alarm"),
            SchedulerKind::Executor => write!(f, "executor"),
            SchedulerKind::NetworkChange => write!(f, "network_change"),
        }
    }
}

/// Platform handles a scheduler may need, passed in rather than looked up
#[derive(Clone)]
pub struct SchedulerEnv {
    pub wake_lock: Arc<dyn WakeLock>,
    pub network_events: Arc<dyn NetworkEventSource>,
    pub alarm_mode: AlarmMode,
}

#[async_trait]
pub trait Scheduler: Send {
    fn kind(&self) -> SchedulerKind;

    /// Start firing `task`. Only the first call is accepted.
    fn schedule(&mut self, task: Task, interval: Duration) -> Result<(), SchedulerError>;

    /// Change the interval of a scheduled task. Safe to call repeatedly.
    fn set_interval(&mut self, interval: Duration) -> Result<(), SchedulerError>;

    /// Stop firing and release everything the scheduler registered. Waits
    /// for an in-flight tick to finish. Calling it twice is harmless.
    async fn destroy(&mut self);
}

/// Build the scheduler for `kind`. A failure here is final for this
/// reconfiguration; callers should not retry in a loop.
pub fn create_scheduler(
    kind: SchedulerKind,
    env: &SchedulerEnv,
) -> Result<Box<dyn Scheduler>, SchedulerError> {
    let scheduler: Box<dyn Scheduler> = match kind {
        SchedulerKind::Alarm => Box::new(AlarmScheduler::new(env)?),
        SchedulerKind::Executor => Box::new(ExecutorScheduler::new(env)?),
        SchedulerKind::NetworkChange => Box::new(NetworkChangeScheduler::new(env)?),
    };
    debug!("Created {} scheduler", kind);
    Ok(scheduler)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Scheduled,
    Destroyed,
}

impl Lifecycle {
    pub(crate) fn begin_schedule(&mut self, kind: SchedulerKind) -> Result<(), SchedulerError> {
        match self {
            Lifecycle::Created => {
                *self = Lifecycle::Scheduled;
                Ok(())
            }
            Lifecycle::Scheduled => Err(SchedulerError::AlreadyScheduled(kind)),
            Lifecycle::Destroyed => Err(SchedulerError::Destroyed(kind)),
        }
    }

    pub(crate) fn ensure_scheduled(&self, kind: SchedulerKind) -> Result<(), SchedulerError> {
        match self {
            Lifecycle::Scheduled => Ok(()),
            Lifecycle::Created => Err(SchedulerError::NotScheduled(kind)),
            Lifecycle::Destroyed => Err(SchedulerError::Destroyed(kind)),
        }
    }
}

/// Timers cannot fire at a zero period, so reject it before it reaches one.
pub(crate) fn ensure_nonzero(interval: Duration, kind: SchedulerKind) -> Result<(), SchedulerError> {
    if interval.is_zero() {
        return Err(SchedulerError::ZeroInterval(kind));
    }
    Ok(())
}

pub(crate) fn current_runtime(
    kind: SchedulerKind,
) -> Result<tokio::runtime::Handle, SchedulerError> {
    tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::RuntimeUnavailable(kind))
}

/// Run one tick. Errors and panics from the task are logged here and never
/// reach the scheduler loop.
pub(crate) async fn run_guarded(task: &Task, kind: SchedulerKind) {
    match AssertUnwindSafe(task()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Sampling task failed on {} scheduler: {:#}", kind, e),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Sampling task panicked on {} scheduler: {}", kind, message);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_factory_builds_requested_kind() {
        let (env, _) = test_env();
        for kind in [SchedulerKind::Alarm, SchedulerKind::Executor, SchedulerKind::NetworkChange] {
            let mut scheduler = create_scheduler(kind, &env).unwrap();
            assert_eq!(scheduler.kind(), kind);
            scheduler.destroy().await;
        }
    }

    #[test]
    fn test_factory_without_runtime_fails() {
        let (env, _) = test_env();
        let err = create_scheduler(SchedulerKind::Alarm, &env).err().unwrap();
        assert!(matches!(err, SchedulerError::RuntimeUnavailable(SchedulerKind::Alarm)));
    }

    #[tokio::test]
    async fn test_run_guarded_swallows_errors_and_panics() {
        let failing = task_fn(|| async { Err(anyhow::anyhow!("boom")) });
        run_guarded(&failing, SchedulerKind::Alarm).await;

        let panicking = task_fn(|| async { panic!("kaboom") });
        run_guarded(&panicking, SchedulerKind::Alarm).await;

        let (task, count) = counting_task();
        run_guarded(&task, SchedulerKind::Alarm).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut lifecycle = Lifecycle::Created;
        assert!(lifecycle.ensure_scheduled(SchedulerKind::Alarm).is_err());
        lifecycle.begin_schedule(SchedulerKind::Alarm).unwrap();
        lifecycle.ensure_scheduled(SchedulerKind::Alarm).unwrap();
        assert!(matches!(
            lifecycle.begin_schedule(SchedulerKind::Alarm),
            Err(SchedulerError::AlreadyScheduled(_))
        ));
        lifecycle = Lifecycle::Destroyed;
        assert!(matches!(
            lifecycle.begin_schedule(SchedulerKind::Alarm),
            Err(SchedulerError::Destroyed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_rejected_and_ticking_continues() {
        let (env, _) = test_env();
        for kind in [SchedulerKind::Alarm, SchedulerKind::Executor, SchedulerKind::NetworkChange] {
            let mut scheduler = create_scheduler(kind, &env).unwrap();
            let (task, _) = counting_task();
            assert!(matches!(
                scheduler.schedule(task.clone(), Duration::ZERO),
                Err(SchedulerError::ZeroInterval(k)) if k == kind
            ));
            // The rejected call did not consume the schedule.
            scheduler.schedule(task, Duration::from_secs(1)).unwrap();
            scheduler.destroy().await;
        }

        for kind in [SchedulerKind::Alarm, SchedulerKind::Executor] {
            let mut scheduler = create_scheduler(kind, &env).unwrap();
            let (task, count) = counting_task();
            scheduler.schedule(task, Duration::from_secs(1)).unwrap();
            tokio::time::sleep(Duration::from_millis(2_500)).await;

            assert!(matches!(
                scheduler.set_interval(Duration::ZERO),
                Err(SchedulerError::ZeroInterval(k)) if k == kind
            ));
            let before = count.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert!(count.load(Ordering::SeqCst) >= before + 9, "{} stopped ticking", kind);
            scheduler.destroy().await;
        }
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(SchedulerKind::NetworkChange.to_string(), "network_change");
        let kind: SchedulerKind = toml::from_str::<toml::Value>("k = 'executor'")
            .unwrap()
            .get("k")
            .unwrap()
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(kind, SchedulerKind::Executor);
    }
}
