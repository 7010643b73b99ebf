use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::monitoring::aggregator::FieldSource;
use crate::monitoring::probe::ReachabilityProbe;
use crate::monitoring::timing::probe_timeout_for;
use crate::monitoring::types::Fields;

struct ProbeTarget {
    host: String,
    per_test_timeout: Duration,
}

/// Adds SOCKET_TEST and HTTP_TEST to each sample.
///
/// The per-check timeout is derived from the sampling interval and is
/// recomputed through [`ProbeSource::set_sampling_interval`] whenever the
/// interval changes.
pub struct ProbeSource {
    probe: Arc<ReachabilityProbe>,
    target: RwLock<ProbeTarget>,
}

impl ProbeSource {
    pub fn new(probe: Arc<ReachabilityProbe>, host: String, sampling_interval: Duration) -> Self {
        Self {
            probe,
            target: RwLock::new(ProbeTarget {
                host,
                per_test_timeout: probe_timeout_for(sampling_interval),
            }),
        }
    }

    pub fn set_sampling_interval(&self, sampling_interval: Duration) {
        if let Ok(mut target) = self.target.write() {
            target.per_test_timeout = probe_timeout_for(sampling_interval);
            debug!("Probe timeout now {:?}", target.per_test_timeout);
        }
    }

    pub fn set_host(&self, host: String) {
        if let Ok(mut target) = self.target.write() {
            target.host = host;
        }
    }

    pub fn per_test_timeout(&self) -> Duration {
        self.target.read().map(|target| target.per_test_timeout).unwrap_or_default()
    }

    pub fn host(&self) -> String {
        self.target.read().map(|target| target.host.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FieldSource for ProbeSource {
    fn name(&self) -> &'static str {
        "reachability"
    }

    async fn get_fields(&self) -> Result<Fields> {
        let (host, per_test_timeout) = {
            let target =
                self.target.read().map_err(|_| anyhow::anyhow!("probe target lock poisoned"))?;
            (target.host.clone(), target.per_test_timeout)
        };
        Ok(self.probe.probe(&host, per_test_timeout).await.into_fields())
    }
}
