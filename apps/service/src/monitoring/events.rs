//! Network state-change notifications that drive the event-triggered
//! scheduler.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sysfs::SysfsRoot;

const EVENT_BUFFER: usize = 64;

/// A qualifying OS-level network event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// An interface changed operational state
    ConnectivityChanged { interface: String, operstate: String },
    /// Radio service state changed; `LinkStateWatcher` reports airplane
    /// mode toggles, embedders may report registration or roaming
    ServiceStateChanged { detail: String },
}

/// Something that can deliver [`NetworkEvent`]s.
///
/// Each call to `subscribe` returns an independent stream; dropping the
/// receiver unsubscribes.
pub trait NetworkEventSource: Send + Sync {
    fn subscribe(&self) -> Result<mpsc::Receiver<NetworkEvent>>;
}

/// Polls interface operstates under `/sys/class/net` and the rfkill radio
/// switches, reporting changes to either
#[derive(Debug, Clone)]
pub struct LinkStateWatcher {
    root: SysfsRoot,
    poll_interval: Duration,
}

impl LinkStateWatcher {
    pub fn new(root: SysfsRoot, poll_interval: Duration) -> Self {
        Self { root, poll_interval }
    }

    fn snapshot(root: &SysfsRoot) -> Result<HashMap<String, String>> {
        Ok(root.interfaces()?.into_iter().map(|iface| (iface.name, iface.operstate)).collect())
    }
}

impl NetworkEventSource for LinkStateWatcher {
    fn subscribe(&self) -> Result<mpsc::Receiver<NetworkEvent>> {
        let mut previous = Self::snapshot(&self.root)?;
        let mut previous_airplane = self.root.airplane_mode();
        let handle = tokio::runtime::Handle::try_current()?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let root = self.root.clone();
        let poll_interval = self.poll_interval;

        handle.spawn(async move {
            let mut timer = tokio::time::interval(poll_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                if tx.is_closed() {
                    break;
                }
                let current = match Self::snapshot(&root) {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Failed to poll link state: {:#}", e);
                        continue;
                    }
                };

                for (interface, operstate) in &current {
                    if previous.get(interface) != Some(operstate) {
                        let event = NetworkEvent::ConnectivityChanged {
                            interface: interface.clone(),
                            operstate: operstate.clone(),
                        };
                        if tx.try_send(event).is_err() {
                            debug!("Network event buffer full or closed, dropping event");
                        }
                    }
                }
                for interface in previous.keys().filter(|name| !current.contains_key(*name)) {
                    let event = NetworkEvent::ConnectivityChanged {
                        interface: interface.clone(),
                        operstate: "removed".to_string(),
                    };
                    if tx.try_send(event).is_err() {
                        debug!("Network event buffer full or closed, dropping event");
                    }
                }
                previous = current;

                let airplane = root.airplane_mode();
                if airplane != previous_airplane {
                    let detail = if airplane { "airplane mode on" } else { "airplane mode off" };
                    let event = NetworkEvent::ServiceStateChanged { detail: detail.to_string() };
                    if tx.try_send(event).is_err() {
                        debug!("Network event buffer full or closed, dropping event");
                    }
                    previous_airplane = airplane;
                }
            }
            debug!("Link state watcher stopped");
        });

        Ok(rx)
    }
}

/// Event source fed by hand
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ChannelEventSource {
    subscribers: std::sync::Mutex<Vec<mpsc::Sender<NetworkEvent>>>,
}

#[cfg(test)]
impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every live subscriber. Returns how many got it.
    pub fn emit(&self, event: NetworkEvent) -> usize {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return 0;
        };
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.iter().filter(|tx| tx.try_send(event.clone()).is_ok()).count()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|mut subscribers| {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.len()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
impl NetworkEventSource for ChannelEventSource {
    fn subscribe(&self) -> Result<mpsc::Receiver<NetworkEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.subscribers
            .lock()
            .map_err(|_| anyhow::anyhow!("event source lock poisoned"))?
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::sysfs::fixtures::{add_interface, add_rfkill, set_operstate};

    #[tokio::test]
    async fn test_channel_source_fans_out() {
        let source = ChannelEventSource::new();
        let mut first = source.subscribe().unwrap();
        let second = source.subscribe().unwrap();
        drop(second);

        let event = NetworkEvent::ServiceStateChanged { detail: "roaming".into() };
        assert_eq!(source.emit(event.clone()), 1);
        assert_eq!(first.recv().await, Some(event));
        assert_eq!(source.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_link_watcher_reports_operstate_change() {
        let dir = tempfile::tempdir().unwrap();
        add_interface(dir.path(), "wlan0", "up", true);

        let watcher =
            LinkStateWatcher::new(SysfsRoot::new(dir.path()), Duration::from_millis(20));
        let mut events = watcher.subscribe().unwrap();

        set_operstate(dir.path(), "wlan0", "down");
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Watcher stopped");
        assert_eq!(
            event,
            NetworkEvent::ConnectivityChanged {
                interface: "wlan0".into(),
                operstate: "down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_link_watcher_reports_airplane_toggle() {
        let dir = tempfile::tempdir().unwrap();
        add_interface(dir.path(), "wwan0", "up", false);
        add_rfkill(dir.path(), "rfkill0", false);

        let watcher =
            LinkStateWatcher::new(SysfsRoot::new(dir.path()), Duration::from_millis(20));
        let mut events = watcher.subscribe().unwrap();

        add_rfkill(dir.path(), "rfkill0", true);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Watcher stopped");
        assert_eq!(event, NetworkEvent::ServiceStateChanged { detail: "airplane mode on".into() });

        add_rfkill(dir.path(), "rfkill0", false);
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Timeout waiting for event")
            .expect("Watcher stopped");
        assert_eq!(event, NetworkEvent::ServiceStateChanged { detail: "airplane mode off".into() });
    }

    #[test]
    fn test_link_watcher_needs_sysfs() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = LinkStateWatcher::new(SysfsRoot::new(dir.path()), Duration::from_secs(1));
        assert!(watcher.subscribe().is_err());
    }
}
