use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::timing::MonotonicClock;
use super::types::{Fields, Sample};

/// A collector for one group of sample fields
#[async_trait]
pub trait FieldSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_create(&self) -> Result<()> {
        Ok(())
    }

    /// Current values. Fields the source cannot supply are simply left out.
    async fn get_fields(&self) -> Result<Fields>;

    async fn on_destroy(&self) {}
}

/// Builds one [`Sample`] from a fixed list of field sources.
///
/// Collection is best effort: a source that errors or panics contributes
/// nothing for that tick and is not retried until the next one.
pub struct SampleAggregator {
    sources: Vec<Arc<dyn FieldSource>>,
    clock: MonotonicClock,
}

impl SampleAggregator {
    pub fn new(sources: Vec<Arc<dyn FieldSource>>) -> Self {
        Self { sources, clock: MonotonicClock::new() }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    pub async fn on_create(&self) {
        for source in &self.sources {
            if let Err(e) = source.on_create().await {
                warn!("Field source {} failed to start: {:#}", source.name(), e);
            }
        }
    }

    pub async fn collect(&self) -> Sample {
        let timestamp = self.clock.now_millis();
        let mut fields = Fields::new();

        for source in &self.sources {
            match AssertUnwindSafe(source.get_fields()).catch_unwind().await {
                Ok(Ok(collected)) => {
                    debug!("{} supplied {} fields", source.name(), collected.len());
                    fields.extend(collected);
                }
                Ok(Err(e)) => warn!("Field source {} failed: {:#}", source.name(), e),
                Err(_) => warn!("Field source {} panicked", source.name()),
            }
        }

        Sample::new(timestamp, fields)
    }

    pub async fn on_destroy(&self) {
        for source in &self.sources {
            source.on_destroy().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Source returning a fixed set of fields
    pub struct StaticSource {
        pub name: &'static str,
        pub fields: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl FieldSource for StaticSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn get_fields(&self) -> Result<Fields> {
            Ok(self.fields.iter().copied().collect())
        }
    }

    /// Source that always errors
    pub struct FailingSource;

    #[async_trait]
    impl FieldSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get_fields(&self) -> Result<Fields> {
            Err(anyhow::anyhow!("radio unavailable"))
        }
    }
}
