//! End-of-tick collaborators: periodic report dispatch and probe-failure
//! alerts. Each keeps its own "last sent" state and rate-limits itself.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sysfs::{LinkKind, SysfsRoot};
use super::types::{ProbeOutcome, ProbeResult};
use crate::database::{SampleFilter, SampleStore};

/// Upper bound on one report upload, which runs inside a tick
const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ReportDispatcher: Send + Sync {
    /// Send a report if enough time has passed since the last one.
    /// Returns whether a report went out.
    async fn dispatch_report_if_due(&self) -> Result<bool>;
}

/// Reporter used when no report target is configured
#[derive(Debug, Default)]
pub struct NoopReporter;

#[async_trait]
impl ReportDispatcher for NoopReporter {
    async fn dispatch_report_if_due(&self) -> Result<bool> {
        Ok(false)
    }
}

struct ReportState {
    last_sent: Option<Instant>,
    /// Timestamp of the newest sample already reported
    reported_through: Option<i64>,
}

/// POSTs the samples recorded since the previous report as a JSON array
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    store: Arc<dyn SampleStore>,
    state: tokio::sync::Mutex<ReportState>,
}

impl WebhookReporter {
    pub fn new(url: String, interval: Duration, store: Arc<dyn SampleStore>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REPORT_TIMEOUT).build()?;
        Ok(Self {
            client,
            url,
            interval,
            store,
            state: tokio::sync::Mutex::new(ReportState { last_sent: None, reported_through: None }),
        })
    }
}

#[async_trait]
impl ReportDispatcher for WebhookReporter {
    async fn dispatch_report_if_due(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(last_sent) = state.last_sent
            && last_sent.elapsed() < self.interval
        {
            return Ok(false);
        }

        let filter = SampleFilter {
            since_millis: state.reported_through.map(|through| through + 1),
            ..SampleFilter::default()
        };
        let samples = self.store.query_ordered_by_timestamp(Some(&filter)).await?;
        if samples.is_empty() {
            debug!("No new samples to report");
            state.last_sent = Some(Instant::now());
            return Ok(false);
        }

        // A failed attempt also waits out the interval; unreported samples
        // go out with the next attempt.
        state.last_sent = Some(Instant::now());
        self.client.post(&self.url).json(&samples).send().await?.error_for_status()?;

        info!("Reported {} samples to {}", samples.len(), self.url);
        state.reported_through = samples.last().map(|sample| sample.timestamp_millis());
        Ok(true)
    }
}

/// Whether the machine should currently be able to reach the network
pub trait ConnectivityExpectation: Send + Sync {
    fn should_expect_connectivity(&self) -> bool;
}

/// Expect connectivity when associated to a wireless access point, or when
/// not in airplane mode with a mobile-data link up
pub struct SysfsConnectivity {
    root: SysfsRoot,
}

impl SysfsConnectivity {
    pub fn new(root: SysfsRoot) -> Self {
        Self { root }
    }
}

impl ConnectivityExpectation for SysfsConnectivity {
    fn should_expect_connectivity(&self) -> bool {
        let Ok(interfaces) = self.root.interfaces() else {
            return false;
        };
        let wifi_associated = interfaces.iter().any(|iface| iface.kind == LinkKind::Wifi && iface.is_up())
            && self.root.wireless().map(|rows| !rows.is_empty()).unwrap_or(false);
        if wifi_associated {
            return true;
        }
        let mobile_data = interfaces.iter().any(|iface| iface.kind == LinkKind::Mobile && iface.is_up());
        !self.root.airplane_mode() && mobile_data
    }
}

pub trait ProbeAlerter: Send + Sync {
    /// Raise an alert for a failed probe unless the failure is expected.
    /// Returns whether an alert was raised.
    fn notify_probe_failure_if_unexpected(&self, outcome: ProbeOutcome) -> bool;
}

/// Alerts through the log, at most once per `min_interval`
pub struct LogAlerter {
    expectation: Arc<dyn ConnectivityExpectation>,
    min_interval: Duration,
    last_alert: Mutex<Option<Instant>>,
}

impl LogAlerter {
    pub fn new(expectation: Arc<dyn ConnectivityExpectation>, min_interval: Duration) -> Self {
        Self { expectation, min_interval, last_alert: Mutex::new(None) }
    }
}

impl ProbeAlerter for LogAlerter {
    fn notify_probe_failure_if_unexpected(&self, outcome: ProbeOutcome) -> bool {
        if outcome.connectivity_class() != ProbeResult::Fail {
            return false;
        }
        if !self.expectation.should_expect_connectivity() {
            debug!("Probe failed but no connectivity is expected, not alerting");
            return false;
        }

        let Ok(mut last_alert) = self.last_alert.lock() else {
            return false;
        };
        if let Some(last) = *last_alert
            && last.elapsed() < self.min_interval
        {
            return false;
        }
        *last_alert = Some(Instant::now());
        warn!(
            socket = %outcome.socket,
            http = %outcome.http,
            "Connectivity probe failed while the network should be reachable"
        );
        true
    }
}

/// Alerter used when alerts are disabled
#[derive(Debug, Default)]
pub struct NoopAlerter;

impl ProbeAlerter for NoopAlerter {
    fn notify_probe_failure_if_unexpected(&self, _outcome: ProbeOutcome) -> bool {
        false
    }
}
