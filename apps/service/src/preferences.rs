//! Live monitoring settings and their change notifications.

use anyhow::Result;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::monitoring::scheduler::SchedulerKind;
use crate::monitoring::validation;

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Settings the monitoring session reacts to while running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub interval_millis: u64,
    pub wake_interval_millis: u64,
    pub scheduler_kind: SchedulerKind,
    pub retention_count: u64,
    pub probe_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_millis: 10_000,
            wake_interval_millis: 0,
            scheduler_kind: SchedulerKind::Alarm,
            retention_count: 10_000,
            probe_host: "www.google.com".into(),
        }
    }
}

/// A changed key with its new value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceChange {
    IntervalMillis(u64),
    WakeIntervalMillis(u64),
    SchedulerKind(SchedulerKind),
    RetentionCount(u64),
    ProbeHost(String),
}

pub struct Preferences {
    settings: RwLock<Settings>,
    changes: broadcast::Sender<PreferenceChange>,
}

impl Preferences {
    pub fn new(settings: Settings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { settings: RwLock::new(settings), changes }
    }

    /// Current settings. Readers outside the monitoring session should
    /// prefer this over reaching into the loop or the scheduler.
    pub fn snapshot(&self) -> Settings {
        match self.settings.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Listen for changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PreferenceChange> {
        self.changes.subscribe()
    }

    /// Rejected values leave the settings untouched and notify nobody.
    pub fn set_interval_millis(&self, value: u64) -> Result<bool> {
        validation::validate_sampling_interval(value)?;
        Ok(self.update(|s| replace(&mut s.interval_millis, value).then_some(PreferenceChange::IntervalMillis(value))))
    }

    pub fn set_wake_interval_millis(&self, value: u64) -> Result<bool> {
        validation::validate_wake_interval(value)?;
        Ok(self.update(|s| {
            replace(&mut s.wake_interval_millis, value).then_some(PreferenceChange::WakeIntervalMillis(value))
        }))
    }

    pub fn set_scheduler_kind(&self, value: SchedulerKind) -> bool {
        self.update(|s| replace(&mut s.scheduler_kind, value).then_some(PreferenceChange::SchedulerKind(value)))
    }

    pub fn set_retention_count(&self, value: u64) -> bool {
        self.update(|s| replace(&mut s.retention_count, value).then_some(PreferenceChange::RetentionCount(value)))
    }

    pub fn set_probe_host(&self, value: String) -> Result<bool> {
        validation::validate_probe_host(&value)?;
        Ok(self.update(|s| {
            replace(&mut s.probe_host, value.clone()).then_some(PreferenceChange::ProbeHost(value))
        }))
    }

    /// Apply every field of `settings`, notifying once per changed key.
    /// Nothing is applied unless every value is valid. Returns how many
    /// keys changed.
    pub fn apply(&self, settings: Settings) -> Result<usize> {
        let Settings { interval_millis, wake_interval_millis, scheduler_kind, retention_count, probe_host } =
            settings;
        validation::validate_sampling_interval(interval_millis)?;
        validation::validate_wake_interval(wake_interval_millis)?;
        validation::validate_probe_host(&probe_host)?;

        Ok([
            self.set_interval_millis(interval_millis)?,
            self.set_wake_interval_millis(wake_interval_millis)?,
            self.set_scheduler_kind(scheduler_kind),
            self.set_retention_count(retention_count),
            self.set_probe_host(probe_host)?,
        ]
        .into_iter()
        .filter(|changed| *changed)
        .count())
    }

    fn update(&self, f: impl FnOnce(&mut Settings) -> Option<PreferenceChange>) -> bool {
        let change = {
            let mut settings = match self.settings.write() {
                Ok(settings) => settings,
                Err(poisoned) => poisoned.into_inner(),
            };
            f(&mut settings)
        };

        match change {
            Some(change) => {
                debug!("Preference changed: {:?}", change);
                // No subscribers is fine; the value is still stored.
                let _ = self.changes.send(change);
                true
            }
            None => false,
        }
    }
}

/// Store `value` in `slot`, returning whether it differed
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_emit_only_on_change() {
        let prefs = Preferences::new(Settings::default());
        let mut rx = prefs.subscribe();

        assert!(!prefs.set_interval_millis(10_000).unwrap());
        assert!(prefs.set_interval_millis(20_000).unwrap());
        assert!(!prefs.set_interval_millis(20_000).unwrap());
        assert!(prefs.set_scheduler_kind(SchedulerKind::Executor));

        assert_eq!(rx.try_recv().unwrap(), PreferenceChange::IntervalMillis(20_000));
        assert_eq!(rx.try_recv().unwrap(), PreferenceChange::SchedulerKind(SchedulerKind::Executor));
        assert!(rx.try_recv().is_err());

        let snapshot = prefs.snapshot();
        assert_eq!(snapshot.interval_millis, 20_000);
        assert_eq!(snapshot.scheduler_kind, SchedulerKind::Executor);
    }

    #[test]
    fn test_apply_notifies_per_changed_key() {
        let prefs = Preferences::new(Settings::default());
        let mut rx = prefs.subscribe();

        let changed = prefs
            .apply(Settings {
                wake_interval_millis: 60_000,
                probe_host: "example.com".into(),
                ..Settings::default()
            })
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(rx.try_recv().unwrap(), PreferenceChange::WakeIntervalMillis(60_000));
        assert_eq!(rx.try_recv().unwrap(), PreferenceChange::ProbeHost("example.com".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected_silently() {
        let prefs = Preferences::new(Settings::default());
        let mut rx = prefs.subscribe();

        assert!(prefs.set_interval_millis(0).is_err());
        assert!(prefs.set_interval_millis(1_999).is_err());
        assert!(prefs.set_wake_interval_millis(86_400_001).is_err());
        assert!(prefs.set_probe_host("http://example.com".into()).is_err());
        assert!(
            prefs
                .apply(Settings {
                    interval_millis: 0,
                    scheduler_kind: SchedulerKind::Executor,
                    ..Settings::default()
                })
                .is_err()
        );

        assert_eq!(prefs.snapshot(), Settings::default());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_changes_without_subscribers_are_kept() {
        let prefs = Preferences::new(Settings::default());
        assert!(prefs.set_retention_count(5));
        assert_eq!(prefs.snapshot().retention_count, 5);

        let rx = prefs.subscribe();
        drop(rx);
        assert!(prefs.set_retention_count(6));
    }
}
